//! Object storage operators.
//!
//! Used for direct S3 uploads and for the client side of `PUT`, where the
//! warehouse hands out a storage location and temporary credentials.

use std::path::Path;

use opendal::Operator;
use tracing::debug;

/// Credentials for an S3 operator. Unset fields fall back to the default AWS
/// provider chain.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct S3Credentials {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("has_secret", &self.secret_access_key.is_some())
            .field("has_session_token", &self.session_token.is_some())
            .finish()
    }
}

/// Location of an S3 bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Location {
    /// Bucket name.
    pub bucket: String,
    /// Key prefix inside the bucket.
    pub root: Option<String>,
    /// Region.
    pub region: Option<String>,
    /// Custom endpoint URL.
    pub endpoint: Option<String>,
}

/// Builds an S3 operator.
pub fn s3_operator(location: &S3Location, creds: &S3Credentials) -> opendal::Result<Operator> {
    let mut builder = opendal::services::S3::default().bucket(&location.bucket);

    if let Some(root) = &location.root {
        builder = builder.root(&format!("/{}", root.trim_matches('/')));
    }
    if let Some(region) = &location.region {
        builder = builder.region(region);
    }
    if let Some(endpoint) = &location.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let (Some(key), Some(secret)) = (&creds.access_key_id, &creds.secret_access_key) {
        builder = builder
            .access_key_id(key)
            .secret_access_key(secret)
            .disable_config_load();
        if let Some(token) = &creds.session_token {
            builder = builder.session_token(token);
        }
    }

    Ok(Operator::new(builder)?.finish())
}

/// Builds a local filesystem operator rooted at `root`.
pub fn fs_operator(root: &str) -> opendal::Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    Ok(Operator::new(builder)?.finish())
}

/// Reads `local_path` and writes it to `key` through `op`.
pub async fn upload_file<E>(op: &Operator, local_path: &Path, key: &str) -> Result<u64, E>
where
    E: From<std::io::Error> + From<opendal::Error>,
{
    let bytes = tokio::fs::read(local_path).await?;
    let size = bytes.len() as u64;
    op.write(key, bytes).await?;
    debug!(path = %local_path.display(), key, size, "Uploaded file");
    Ok(size)
}

/// Returns the final path component of `path`, used as the object key.
#[must_use]
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
