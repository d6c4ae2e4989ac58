use clap::Parser;

/// Configuration for the vstore-jobs host.
#[derive(Parser, Debug, Clone)]
#[command(name = "vstore-jobs")]
#[command(about = "Runs a vstore maintenance job against S3")]
pub struct Config {
    /// Job to run (e.g. lock-cleanup)
    #[arg(long, env = "VSTORE_JOB")]
    pub job: String,

    /// S3 endpoint URL; unset uses the AWS default for the region
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, default_value = "us-east-1", env = "S3_REGION")]
    pub s3_region: String,

    /// S3 access key ID; unset uses the default AWS credential chain
    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub s3_access_key_id: Option<String>,

    /// S3 secret access key
    #[arg(long, env = "S3_SECRET_ACCESS_KEY")]
    pub s3_secret_access_key: Option<String>,

    /// Versioned bucket holding lock markers
    #[arg(long, env = "VSTORE_LOCKS_BUCKET")]
    pub locks_bucket: String,

    /// Use path-style addressing (MinIO and most S3-compatible stores)
    #[arg(long, default_value_t = false, env = "S3_FORCE_PATH_STYLE")]
    pub force_path_style: bool,
}

impl Config {
    /// Static credentials, when both halves are configured.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.s3_access_key_id, &self.s3_secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}
