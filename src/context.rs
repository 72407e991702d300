//! Per-request context shared by the middleware chain.

use http::StatusCode;

use crate::error::RequestError;
use crate::request::Request;
use crate::response::Response;

/// Everything the middleware chain knows about one in-flight request.
///
/// Created by the router for each request and dropped once the response has
/// been produced. Middleware read the request, inspect the outcome after
/// delegating, and may abort the chain, attach errors or force a status.
#[derive(Debug)]
pub struct Context {
    request: Request,
    response: Option<Response>,
    status: Option<StatusCode>,
    errors: Vec<RequestError>,
    aborted: bool,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            status: None,
            errors: Vec::new(),
            aborted: false,
        }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }
    pub fn response(&self) -> Option<&Response> { self.response.as_ref() }
    pub fn errors(&self) -> &[RequestError] { &self.errors }
    pub fn is_aborted(&self) -> bool { self.aborted }

    /// The status the client will receive: a forced status first, then the
    /// handler's response status, else `200 OK`.
    pub fn status(&self) -> StatusCode {
        self.status
            .or_else(|| self.response.as_ref().map(Response::status_code))
            .unwrap_or(StatusCode::OK)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Stores the handler's response. Errors it carries move to the context.
    pub fn set_response(&mut self, mut response: Response) {
        self.errors.extend(response.take_errors());
        self.response = Some(response);
    }

    /// Appends an error to the request. Does not touch the response.
    pub fn error(&mut self, err: impl Into<RequestError>) {
        self.errors.push(err.into());
    }

    /// Stops the remaining chain from running. Middleware already on the
    /// stack still finish their post-processing.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Aborts and replaces whatever response was produced with an empty one
    /// carrying `status`.
    pub fn abort_with_status(&mut self, status: StatusCode) {
        self.abort();
        self.response = None;
        self.status = Some(status);
    }

    pub(crate) fn into_response(self) -> Response {
        let status = self.status();
        match self.response {
            Some(mut response) => {
                response.status = status;
                response
            }
            None => Response::status(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ctx() -> Context {
        Context::new(Request::new(http::Request::new(Bytes::new())))
    }

    #[test]
    fn status_defaults_to_ok_then_follows_response_then_override() {
        let mut ctx = ctx();
        assert_eq!(ctx.status(), StatusCode::OK);

        ctx.set_response(Response::status(StatusCode::ACCEPTED));
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);

        ctx.set_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(ctx.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn response_errors_move_into_context() {
        let mut ctx = ctx();
        ctx.error(RequestError::msg("first"));
        ctx.set_response(Response::text("ok").with_error(RequestError::msg("second")));

        let messages: Vec<_> = ctx.errors().iter().map(ToString::to_string).collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[test]
    fn abort_with_status_discards_body() {
        let mut ctx = ctx();
        ctx.set_response(Response::text("partial"));
        ctx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR);

        assert!(ctx.is_aborted());
        let res = ctx.into_response();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.body().is_empty());
    }
}
