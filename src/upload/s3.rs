// S3 object store
// Serves AWS S3 and S3-compatible services (Wasabi) through one client, the
// latter selected by an endpoint override.

use super::store::{read_error, ObjectStore, StoreConnector};
use super::UploadError;
use crate::config::UploadTarget;
use async_trait::async_trait;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use std::fmt::Debug;
use std::io;
use std::path::Path;
use tracing::debug;

/// Connects targets to S3 using each target's own profile, region and endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct S3Connector;

impl S3Connector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(&self, target: &UploadTarget) -> Result<Box<dyn ObjectStore>, UploadError> {
        Ok(Box::new(S3ObjectStore::connect(target).await?))
    }
}

/// Bucket on an S3-compatible service
pub struct S3ObjectStore {
    client: Client,
    target: String,
    bucket: String,
}

impl S3ObjectStore {
    /// Load configuration for `target` and resolve its credentials.
    pub async fn connect(target: &UploadTarget) -> Result<Self, UploadError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        // A named profile is the only credential source for its target;
        // the default chain would let AWS_ACCESS_KEY_ID win over it
        if let Some(ref profile) = target.profile {
            let credentials = ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build();
            loader = loader.profile_name(profile).credentials_provider(credentials);
        }
        if let Some(ref region) = target.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        // Wasabi and other S3-compatible services
        if let Some(ref endpoint) = target.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        check_credentials(target, &sdk_config).await?;

        debug!(
            destination = %target.name,
            region = ?sdk_config.region(),
            "Resolved credentials for target"
        );

        Ok(Self {
            client: build_client(&sdk_config, target.force_path_style),
            target: target.name.clone(),
            bucket: target.bucket.clone(),
        })
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

async fn check_credentials(target: &UploadTarget, sdk_config: &SdkConfig) -> Result<(), UploadError> {
    let provider = sdk_config
        .credentials_provider()
        .ok_or_else(|| UploadError::CredentialsUnavailable {
            target: target.name.clone(),
            message: "no credentials provider configured".to_string(),
        })?;

    provider
        .provide_credentials()
        .await
        .map_err(|e| UploadError::CredentialsUnavailable {
            target: target.name.clone(),
            message: DisplayErrorContext(&e).to_string(),
        })?;

    Ok(())
}

fn build_client(sdk_config: &SdkConfig, force_path_style: bool) -> Client {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
    if force_path_style {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}

/// Service error codes meaning the keys themselves were refused
const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "TokenRefreshRequired",
];

/// Classify an SDK failure by where it happened.
fn sdk_error<E, R>(target: &str, uri: &str, err: SdkError<E, R>) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    let keys_refused = matches!(err, SdkError::ServiceError(_))
        && err
            .code()
            .is_some_and(|code| CREDENTIAL_ERROR_CODES.contains(&code));
    if keys_refused {
        return UploadError::CredentialsUnavailable {
            target: target.to_string(),
            message,
        };
    }

    let uri = uri.to_string();
    match err {
        SdkError::ServiceError(_) => UploadError::Rejected { uri, message },
        SdkError::ConstructionFailure(_) => UploadError::InvalidRequest { uri, message },
        _ => UploadError::Network { uri, message },
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), UploadError> {
        let uri = self.uri(key);

        // Guard against the file disappearing after enumeration
        tokio::fs::metadata(path)
            .await
            .map_err(|e| read_error(path, e))?;

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| read_error(path, io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(&self.target, &uri, e))?;

        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| sdk_error(&self.target, &self.uri(prefix), e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}
