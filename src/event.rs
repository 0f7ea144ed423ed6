//! Lifecycle events delivered to a worker.
//!
//! Handlers never block. They register futures on the event and the host
//! awaits them: [`InstallEvent::wait_until`] extends the install until the
//! future settles, [`FetchEvent::respond_with`] hands the host the future
//! that produces the response.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{Error, Result};
use crate::request::{Request, Response};

/// Install lifecycle event.
#[derive(Default)]
pub struct InstallEvent {
    pending: Vec<BoxFuture<'static, Result<()>>>,
}

impl InstallEvent {
    /// Creates an install event with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays install completion until `work` settles. If it fails, install fails.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.push(work.boxed());
    }

    /// Returns how many futures install is waiting on.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Awaits every registered future. The first error wins.
    pub(crate) async fn settle(self) -> Result<()> {
        futures::future::try_join_all(self.pending).await.map(|_| ())
    }
}

/// Fetch interception event for one request.
pub struct FetchEvent {
    request: Request,
    response: Option<BoxFuture<'static, Result<Response>>>,
}

impl FetchEvent {
    /// Creates a fetch event for `request`.
    #[must_use]
    pub const fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
        }
    }

    /// Returns the intercepted request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Takes ownership of producing the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyResponded`] if a response was already supplied.
    pub fn respond_with<F>(&mut self, response: F) -> Result<()>
    where
        F: Future<Output = Result<Response>> + Send + 'static,
    {
        if self.response.is_some() {
            return Err(Error::AlreadyResponded);
        }
        self.response = Some(response.boxed());
        Ok(())
    }

    /// Returns true once a handler has called [`respond_with`](Self::respond_with).
    #[must_use]
    pub const fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Splits the event into its request and the supplied response, if any.
    pub(crate) fn into_parts(self) -> (Request, Option<BoxFuture<'static, Result<Response>>>) {
        (self.request, self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{StatusCode, Url};

    fn request() -> Request {
        Request::get(Url::parse("http://money.test/app/index.html").unwrap())
    }

    #[tokio::test]
    async fn install_settles_after_all_work() {
        let mut event = InstallEvent::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        event.wait_until(async move {
            rx.await.map_err(|e| Error::InvalidState(e.to_string()))
        });
        event.wait_until(async { Ok(()) });
        assert_eq!(event.pending(), 2);

        let settle = tokio::spawn(event.settle());
        tokio::task::yield_now().await;
        assert!(!settle.is_finished());

        tx.send(()).unwrap();
        assert!(settle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn install_fails_if_any_work_fails() {
        let mut event = InstallEvent::new();
        event.wait_until(async { Ok(()) });
        event.wait_until(async { Err(Error::InvalidUrl("x".to_string())) });
        assert!(matches!(event.settle().await, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn empty_install_settles_ok() {
        assert!(InstallEvent::new().settle().await.is_ok());
    }

    #[tokio::test]
    async fn respond_with_only_once() {
        let mut event = FetchEvent::new(request());
        assert!(!event.has_response());
        event
            .respond_with(async { Ok(Response::new(StatusCode::OK, "first")) })
            .unwrap();
        let second = event.respond_with(async { Ok(Response::new(StatusCode::OK, "second")) });
        assert!(matches!(second, Err(Error::AlreadyResponded)));

        let (req, response) = event.into_parts();
        assert_eq!(req, request());
        let resp = response.unwrap().await.unwrap();
        assert_eq!(resp.body, "first");
    }
}
