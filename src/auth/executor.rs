//! Authenticated request path
//!
//! Every feature call goes through [`Session::call`]: bearer attachment,
//! renewal on 401 and the single retry all live here.

use serde::de::DeserializeOwned;

use super::renewal::RenewalTrigger;
use super::session::{Session, TerminationReason};
use crate::api::{ApiError, ApiRequest, ApiResponse};

impl Session {
    /// Send an authenticated request.
    ///
    /// A 401 triggers one renewal and one retry. A second 401, or a failed
    /// renewal, terminates the session. Other non-2xx answers come back as
    /// [`ApiError::Http`] with no session side effects.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let credential = match self.inner.store.get() {
            Some(credential) => credential,
            None => match self.renew(RenewalTrigger::Request).await {
                Ok(credential) => credential,
                Err(e) => {
                    tracing::debug!("No credential for {} {}: {}", request.method, request.path, e);
                    self.terminate(Session::renewal_failure_reason(&e));
                    return Err(ApiError::Unauthorized);
                }
            },
        };

        let response = self
            .inner
            .transport
            .execute(request.clone(), Some(credential.token().to_string()))
            .await?;
        if response.status != 401 {
            return response.error_for_status();
        }

        tracing::debug!("{} {} -> 401, renewing", request.method, request.path);
        // Another caller may have renewed while this request was in flight.
        let renewed = match self.inner.store.get() {
            Some(current) if current != credential => current,
            _ => match self.renew(RenewalTrigger::Request).await {
                Ok(credential) => credential,
                Err(e) => {
                    self.terminate(Session::renewal_failure_reason(&e));
                    return Err(ApiError::RenewalFailed(e));
                }
            },
        };

        let retried = self
            .inner
            .transport
            .execute(request.clone(), Some(renewed.token().to_string()))
            .await?;
        if retried.status == 401 {
            tracing::warn!(
                "{} {} rejected a freshly renewed credential",
                request.method,
                request.path
            );
            self.terminate(TerminationReason::CredentialRejected);
            return Err(ApiError::Unauthorized);
        }
        retried.error_for_status()
    }

    /// Authenticated call decoding a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.call(request).await?.json()
    }

    /// Authenticated call with a JSON body, decoding a JSON response.
    pub async fn send_json<B, T>(&self, request: ApiRequest, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(request.json(body)?).await?.json()
    }
}
