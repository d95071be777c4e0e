use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use chat_relay_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the last user message word by word, failing on a `!` word.
#[derive(Debug)]
struct FakeModelResponse {
    fake_items: VecDeque<String>,
    sleep: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl FakeModelResponse {
    fn new(input: &str) -> Self {
        let fake_items = format!("You said {}", input)
            .split(' ')
            .map(ToString::to_string)
            .collect();
        Self {
            fake_items,
            sleep: None,
            finished: false,
        }
    }
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            if let Some(mut this_item) = this.fake_items.pop_front() {
                if this_item == "!" {
                    return Poll::Ready(Err(FakeModelProviderError(
                        ErrorKind::Moderated,
                    )));
                }
                if !this.fake_items.is_empty() {
                    this_item.push(' ');
                }
                return Poll::Ready(Ok(Some(
                    ModelResponseEvent::MessageDelta(this_item),
                )));
            }

            if !this.finished {
                this.finished = true;
                return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                    ModelFinishReason::Stop,
                ))));
            }
            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_event(cx)
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = match req.messages.last() {
            Some(ModelMessage::User(text)) => Ok(FakeModelResponse::new(text)),
            Some(_) | None => Err(FakeModelProviderError(ErrorKind::Other)),
        };
        ready(result)
    }

    fn list_models(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'static
    {
        ready(Ok(vec!["echo".to_owned()]))
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    async fn drain(
        resp: &mut FakeModelResponse,
    ) -> Result<String, FakeModelProviderError> {
        let mut resp_message = String::new();
        loop {
            match poll_fn(|cx| Pin::new(&mut *resp).poll_next_event(cx)).await? {
                Some(ModelResponseEvent::MessageDelta(delta)) => {
                    resp_message.push_str(&delta);
                }
                Some(ModelResponseEvent::Completed(_)) => {}
                None => return Ok(resp_message),
            }
        }
    }

    #[tokio::test]
    async fn test_completion() {
        let provider = FakeModelProvider;
        let req = ModelRequest {
            messages: vec![
                ModelMessage::User("Hi".to_string()),
                ModelMessage::Assistant("Hello".to_string()),
                ModelMessage::User("Good morning".to_string()),
            ],
        };
        let mut resp = provider.send_request(&req).await.unwrap();
        assert_eq!(drain(&mut resp).await.unwrap(), "You said Good morning");

        // Polling after completion keeps returning `None`.
        let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap();
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_mid_stream_error() {
        let provider = FakeModelProvider;
        let req = ModelRequest {
            messages: vec![ModelMessage::User("bad ! words".to_string())],
        };
        let mut resp = provider.send_request(&req).await.unwrap();
        let err = drain(&mut resp).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_error() {
        let provider = FakeModelProvider;
        let req = ModelRequest::default();
        let result = provider.send_request(&req).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);

        assert_eq!(provider.list_models().await.unwrap(), vec!["echo"]);
    }
}
