use axum::http::{HeaderName, HeaderValue};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Default)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let value = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(value))
    }
}

type RequestIdLayerStack =
    Stack<PropagateRequestIdLayer, Stack<SetRequestIdLayer<UuidRequestId>, Identity>>;

/// A `tower` layer stack that echoes an inbound `X-Request-Id` header back
/// on the response, generating one via a random v4 UUID when the caller
/// did not supply it.
#[must_use]
pub fn request_id_layer() -> ServiceBuilder<RequestIdLayerStack> {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER.clone(), UuidRequestId))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
}
