use k8s_openapi::api::authorization::v1::{
    ResourceAttributes,
    SelfSubjectAccessReview,
    SelfSubjectAccessReviewSpec,
};
use kube::Client;
use kube::api::{
    Api,
    PostParams,
};
use tracing::debug;

use crate::error::{
    Error,
    Result,
};

const FALLBACK_DENIAL_REASON: &str = "insufficient permissions";

/// Verifies the caller may create `pods/portforward` for the target pod.
///
/// Runs before any tunnel state is built: a denied caller never causes a
/// session record, a bound port, or a spawned task.
pub async fn check_portforward_permission(
    client: Client, namespace: &str, pod: &str,
) -> Result<()> {
    let api: Api<SelfSubjectAccessReview> = Api::all(client);
    let review = SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                verb: Some("create".to_string()),
                resource: Some("pods".to_string()),
                subresource: Some("portforward".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(pod.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    };

    let created = api
        .create(&PostParams::default(), &review)
        .await
        .map_err(|e| Error::PermissionCheck(e.to_string()))?;

    let status = created.status.unwrap_or_default();
    if status.allowed {
        debug!(namespace, pod, "portforward permission granted");
        return Ok(());
    }

    let reason = status
        .reason
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| FALLBACK_DENIAL_REASON.to_string());
    Err(Error::PermissionDenied(reason))
}

#[cfg(test)]
mod tests {
    use http::{
        Request,
        Response,
        StatusCode,
    };
    use k8s_openapi::api::authorization::v1::SubjectAccessReviewStatus;
    use kube::client::Body;
    use tower_test::mock;

    use super::*;

    async fn respond_with_review(
        handle: &mut mock::Handle<Request<Body>, Response<Body>>, allowed: bool,
        reason: Option<&str>,
    ) {
        let (request, send) = handle.next_request().await.expect("review expected");
        assert_eq!(request.method(), "POST");
        assert_eq!(
            request.uri().path(),
            "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews"
        );

        let review = SelfSubjectAccessReview {
            status: Some(SubjectAccessReviewStatus {
                allowed,
                reason: reason.map(|r| r.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .body(Body::from(serde_json::to_vec(&review).unwrap()))
            .unwrap();
        send.send_response(response);
    }

    #[tokio::test]
    async fn test_allowed_review_passes() {
        let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            respond_with_review(&mut handle, true, None).await;
        });

        let result = check_portforward_permission(client, "demo", "web-0").await;
        assert!(result.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_review_carries_the_reason() {
        let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            respond_with_review(&mut handle, false, Some("forbidden by policy")).await;
        });

        let err = check_portforward_permission(client, "demo", "web-0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(err.to_string(), "forbidden by policy");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_review_without_reason_uses_fallback() {
        let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            respond_with_review(&mut handle, false, None).await;
        });

        let err = check_portforward_permission(client, "demo", "web-0")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), FALLBACK_DENIAL_REASON);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_review_call_is_a_check_error() {
        let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            let (_, send) = handle.next_request().await.expect("review expected");
            let response = Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from(serde_json::to_vec(&serde_json::json!({})).unwrap()))
                .unwrap();
            send.send_response(response);
        });

        let err = check_portforward_permission(client, "demo", "web-0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionCheck(_)));
        server.await.unwrap();
    }
}
