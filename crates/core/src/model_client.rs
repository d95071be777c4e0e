use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;

use chat_relay_model::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use futures_util::{Stream, stream};
use tracing::{Instrument, Span};

/// A type-erased error from the model provider.
pub type ModelError = Box<dyn ModelProviderError>;

/// Content increments of one completion, in the order the model
/// produced them. The stream ends right after the first error.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type HandlerFn = Arc<dyn Fn(ModelRequest) -> CompletionStream + Send + Sync>;
type ListModelsFn =
    Arc<dyn Fn() -> BoxedFuture<Result<Vec<String>, ModelError>> + Send + Sync>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    list_models_fn: ListModelsFn,
}

impl ModelClient {
    /// Wraps the given provider.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);
        let handler_fn: HandlerFn = {
            let provider = Arc::clone(&provider);
            Arc::new(move |req| stream_response(Arc::clone(&provider), req))
        };
        let list_models_fn: ListModelsFn = Arc::new(move || {
            let fut = provider.list_models();
            Box::pin(async move {
                fut.await.map_err(|err| {
                    warn!("failed to list models: {err}");
                    Box::new(err) as ModelError
                })
            })
        });
        Self {
            handler_fn,
            list_models_fn,
        }
    }

    /// Sends a request and returns the stream of content increments.
    ///
    /// Nothing is sent until the stream is first polled.
    ///
    /// # Cancel safety
    ///
    /// Dropping the stream stops the response from streaming further
    /// events.
    #[inline]
    pub fn stream_completion(&self, req: ModelRequest) -> CompletionStream {
        (self.handler_fn)(req)
    }

    /// Lists the models the provider can serve.
    #[inline]
    pub async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        (self.list_models_fn)().await
    }
}

enum ResponseState<P: ModelProvider> {
    Pending(Arc<P>, ModelRequest),
    Streaming(Pin<Box<P::Response>>),
    Finished,
}

fn stream_response<P: ModelProvider + 'static>(
    provider: Arc<P>,
    req: ModelRequest,
) -> CompletionStream {
    let span = trace_span!("model client req");
    let state = ResponseState::Pending(provider, req);
    Box::pin(stream::unfold(state, move |state| {
        next_increment::<P>(state).instrument(Span::clone(&span))
    }))
}

async fn next_increment<P: ModelProvider + 'static>(
    state: ResponseState<P>,
) -> Option<(Result<String, ModelError>, ResponseState<P>)> {
    let mut resp = match state {
        ResponseState::Pending(provider, req) => {
            trace!("got a request: {:?}", req);
            match provider.send_request(&req).await {
                Ok(resp) => {
                    trace!("start receiving events");
                    Box::pin(resp)
                }
                Err(err) => {
                    error!("got an error: {err:?}");
                    let err = Box::new(err) as ModelError;
                    return Some((Err(err), ResponseState::Finished));
                }
            }
        }
        ResponseState::Streaming(resp) => resp,
        ResponseState::Finished => return None,
    };

    loop {
        let event_or_err =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                let err = Box::new(err) as ModelError;
                return Some((Err(err), ResponseState::Finished));
            }
        };

        let Some(event) = event else {
            trace!("finished a request");
            return None;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                return Some((Ok(delta), ResponseState::Streaming(resp)));
            }
            ModelResponseEvent::Completed(reason) => {
                debug!("model finished: {reason:?}");
            }
        }
    }
}
