//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chat_relay_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    completed: bool,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.completed {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            return match this.events.pop_front() {
                Some(PresetEvent::MessageDelta(msg)) => {
                    Poll::Ready(Ok(Some(ModelResponseEvent::MessageDelta(msg))))
                }
                Some(PresetEvent::Error(message)) => {
                    this.completed = true;
                    Poll::Ready(Err(Error::new(message, ErrorKind::Other)))
                }
                None => {
                    this.completed = true;
                    Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                        ModelFinishReason::Stop,
                    ))))
                }
            };
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    // Failed attempts against the response at the front of the queue.
    attempts: u64,
    requests: Vec<ModelRequest>,
    models: Vec<String>,
    models_unavailable: bool,
    delay: Option<Duration>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to queue the responses, which is how
/// the model should respond to each request, in order. If there are no
/// enough responses in the queue, an error will be returned.
///
/// Clones share the same script, so a test can keep one clone around to
/// inspect the requests that the code under test has sent.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
}

impl TestModelProvider {
    #[inline]
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.script().responses.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        self.script().delay = Some(duration);
    }

    #[inline]
    pub fn set_models<I, S>(&self, models: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut script = self.script();
        script.models = models.into_iter().map(Into::into).collect();
        script.models_unavailable = false;
    }

    /// Makes every following model enumeration fail.
    #[inline]
    pub fn set_models_unavailable(&self) {
        self.script().models_unavailable = true;
    }

    /// Returns all requests received so far, oldest first.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script().requests.clone()
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.script();
        script.requests.push(req.clone());

        let result = 'blk: {
            let Some(failures) = script.responses.front().map(|r| r.failures)
            else {
                break 'blk Err(Error::new(
                    "no more scripted responses",
                    ErrorKind::Other,
                ));
            };
            match failures {
                Some(0) => {
                    break 'blk Err(Error::new(
                        "request rejected",
                        ErrorKind::RateLimitExceeded,
                    ));
                }
                Some(failures) if script.attempts < failures => {
                    script.attempts += 1;
                    break 'blk Err(Error::new(
                        "request rejected",
                        ErrorKind::RateLimitExceeded,
                    ));
                }
                _ => {}
            }

            script.attempts = 0;
            let delay = script.delay.unwrap_or(Duration::from_millis(1));
            let preset = script
                .responses
                .pop_front()
                .expect("front response was just checked");
            Ok(TestModelResponse {
                events: preset.events.into(),
                delay,
                sleep: None,
                completed: false,
            })
        };
        ready(result)
    }

    fn list_models(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'static
    {
        let script = self.script();
        let result = if script.models_unavailable {
            Err(Error::new("connection refused", ErrorKind::Other))
        } else {
            Ok(script.models.clone())
        };
        ready(result)
    }
}
