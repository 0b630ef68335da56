//! Remote origin allow-list.
//!
//! The document is `{"origins": ["https://…", …]}`. It is fetched once at
//! startup; any failure leaves the embedded list in force.

use std::time::Duration;

use hostlink_kernel::OriginPolicy;
use hostlink_types::LinkError;
use serde::Deserialize;
use tracing::{info, warn};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RemoteOrigins {
    origins: Vec<String>,
}

/// Download the remote list.
pub async fn fetch(url: &str, timeout: Duration) -> Result<Vec<String>, LinkError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LinkError::Channel(format!("http client: {e}")))?;
    let doc: RemoteOrigins = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| LinkError::Channel(format!("fetching {url}: {e}")))?
        .json()
        .await
        .map_err(|e| LinkError::InvalidArgument(format!("malformed allow-list at {url}: {e}")))?;
    Ok(doc.origins)
}

/// Merge the remote list into `policy`. Returns the number of remote
/// origins now in force; `0` means only the embedded list applies.
pub async fn refresh(policy: &OriginPolicy, url: &str) -> usize {
    match fetch(url, FETCH_TIMEOUT).await {
        Ok(origins) => {
            let n = policy.replace_remote(origins);
            info!(%url, origins = n, "remote origin allow-list loaded");
            n
        }
        Err(e) => {
            warn!(%url, error = %e, "remote allow-list unavailable; using embedded list");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return its URL.
    async fn serve_once(body: &'static str, status: &'static str) -> Result<String, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        Ok(format!("http://{addr}/allowed.json"))
    }

    #[tokio::test]
    async fn remote_origins_are_merged() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once(r#"{"origins":["https://app.example"]}"#, "200 OK").await?;
        let policy = OriginPolicy::default();
        assert_eq!(refresh(&policy, &url).await, 1);
        assert!(policy.check(Some("https://app.example"), None).is_ok());
        assert!(policy.check(Some("https://turbowarp.org"), None).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_keeps_embedded_list() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once("nope", "500 Internal Server Error").await?;
        let policy = OriginPolicy::default();
        assert_eq!(refresh(&policy, &url).await, 0);
        assert!(policy.check(Some("https://turbowarp.org"), None).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once(r#"["https://app.example"]"#, "200 OK").await?;
        let err = fetch(&url, FETCH_TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        Ok(())
    }
}
