//! Azure Blob Storage backend speaking the Blob REST API.
//!
//! Blocks map onto the block blob primitives:
//!
//! - [`put_block`](BlockStore::put_block) → Put Block (`?comp=block&blockid=..`)
//! - [`list_uncommitted_blocks`](BlockStore::list_uncommitted_blocks) → Get Block List
//!   (`?comp=blocklist&blocklisttype=uncommitted`)
//! - [`put_block_list`](BlockStore::put_block_list) → Put Block List (`?comp=blocklist`)
//!
//! Requests are authorised with the shared access signature of a [`ConnectionString`].

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use secrecy::ExposeSecret;

use super::common::{BlockStore, USER_AGENT};
use crate::credential::ConnectionString;
use crate::error::{StoreError, StoreResult};
use crate::id::BlockId;

/// REST API version sent with every request.
const API_VERSION: &str = "2023-11-03";

/// A [`BlockStore`] backed by a container in Azure Blob Storage.
pub struct AzureBlobStore {
    client: reqwest::Client,
    credential: ConnectionString,
    container: String,
}

impl AzureBlobStore {
    /// Creates a store bound to `container` in the account of the given connection string.
    ///
    /// With a `request_timeout`, a request that has not completed in time fails with a timeout
    /// error instead of waiting on a stalled connection forever.
    pub fn new(
        credential: ConnectionString,
        container: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> StoreResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(request_timeout) = request_timeout {
            builder = builder.timeout(request_timeout);
        }
        let client = builder
            .build()
            .map_err(|cause| StoreError::reqwest("failed to build http client", cause))?;

        Ok(Self {
            client,
            credential,
            container: container.into(),
        })
    }

    /// Builds the URL of the container, or of a blob within it, with the SAS token attached.
    fn url(&self, blob: Option<&str>, query: &[(&str, &str)]) -> StoreResult<Url> {
        let mut url = self.credential.endpoint().clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| StoreError::Generic {
                context: "blob endpoint cannot be a base URL".into(),
                cause: url_error(self.credential.endpoint().as_str()),
            })?;
            segments.pop_if_empty().push(&self.container);
            if let Some(blob) = blob {
                segments.push(blob);
            }
        }

        url.set_query(Some(self.credential.sas().expose_secret()));
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("x-ms-version", API_VERSION)
    }

    /// Sends the request, accepting success statuses and the listed extra ones.
    async fn send(
        &self,
        context: &str,
        request: RequestBuilder,
        accept: &[StatusCode],
    ) -> StoreResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|cause| StoreError::reqwest(context, cause))?;

        let status = response.status();
        if status.is_success() || accept.contains(&status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            context: context.to_owned(),
            status,
            body,
        })
    }
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("endpoint", &self.credential.endpoint().as_str())
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl BlockStore for AzureBlobStore {
    fn name(&self) -> &'static str {
        "azure"
    }

    #[tracing::instrument(level = "trace", fields(container = %self.container), skip_all)]
    async fn create_container(&self) -> StoreResult<()> {
        let url = self.url(None, &[("restype", "container")])?;
        let response = self
            .send(
                "create container",
                self.request(Method::PUT, url),
                &[StatusCode::CONFLICT],
            )
            .await?;

        if response.status() == StatusCode::CONFLICT {
            tracing::debug!("Container already exists");
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(%blob, %id), skip_all)]
    async fn put_block(&self, blob: &str, id: &BlockId, data: Bytes) -> StoreResult<()> {
        let url = self.url(Some(blob), &[("comp", "block"), ("blockid", id.as_str())])?;
        let request = self
            .request(Method::PUT, url)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        self.send("put block", request, &[]).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(%blob), skip_all)]
    async fn list_uncommitted_blocks(&self, blob: &str) -> StoreResult<HashSet<BlockId>> {
        let url = self.url(
            Some(blob),
            &[("comp", "blocklist"), ("blocklisttype", "uncommitted")],
        )?;
        let response = self
            .send(
                "get block list",
                self.request(Method::GET, url),
                &[StatusCode::NOT_FOUND],
            )
            .await?;

        // The blob does not exist until its first block is staged.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(HashSet::new());
        }

        let body = response
            .text()
            .await
            .map_err(|cause| StoreError::reqwest("get block list body", cause))?;
        Ok(parse_uncommitted_blocks(&body))
    }

    #[tracing::instrument(level = "trace", fields(%blob, blocks = ids.len()), skip_all)]
    async fn put_block_list(&self, blob: &str, ids: &[BlockId]) -> StoreResult<()> {
        let url = self.url(Some(blob), &[("comp", "blocklist")])?;
        let request = self
            .request(Method::PUT, url)
            .header("Content-Type", "application/xml")
            .body(block_list_xml(ids));
        self.send("put block list", request, &[]).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(%blob), skip_all)]
    async fn delete_blob(&self, blob: &str) -> StoreResult<()> {
        let url = self.url(Some(blob), &[])?;
        self.send(
            "delete blob",
            self.request(Method::DELETE, url),
            &[StatusCode::NOT_FOUND],
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(container = %self.container), skip_all)]
    async fn delete_container(&self) -> StoreResult<()> {
        let url = self.url(None, &[("restype", "container")])?;
        self.send(
            "delete container",
            self.request(Method::DELETE, url),
            &[StatusCode::NOT_FOUND],
        )
        .await?;
        Ok(())
    }
}

fn url_error(endpoint: &str) -> Box<dyn std::error::Error + Send + Sync> {
    format!("`{endpoint}` has no path").into()
}

/// Renders the request body of Put Block List.
fn block_list_xml(ids: &[BlockId]) -> String {
    // Each entry is `<Latest>` plus an 8 character id plus `</Latest>`.
    let mut xml = String::with_capacity(64 + ids.len() * 25);
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for id in ids {
        xml.push_str("<Latest>");
        xml.push_str(id.as_str());
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Extracts block names from the `UncommittedBlocks` section of a Get Block List response.
///
/// Names are taken verbatim without decoding XML entities. Base64 block ids never contain `&`, `<`
/// or `>`, so this only holds as long as ids stay base64.
fn parse_uncommitted_blocks(body: &str) -> HashSet<BlockId> {
    let Some(start) = body.find("<UncommittedBlocks>") else {
        return HashSet::new();
    };
    let section = &body[start..];
    let section = match section.find("</UncommittedBlocks>") {
        Some(end) => &section[..end],
        None => section,
    };

    let mut ids = HashSet::new();
    let mut rest = section;
    while let Some(open) = rest.find("<Name>") {
        rest = &rest[open + "<Name>".len()..];
        let Some(close) = rest.find("</Name>") else {
            break;
        };
        ids.insert(BlockId::from_raw(&rest[..close]));
        rest = &rest[close..];
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AzureBlobStore {
        let credential = "BlobEndpoint=https://acct.blob.core.windows.net/;\
             SharedAccessSignature=sv=2022-11-02&sig=a%2Bb"
            .parse()
            .unwrap();
        AzureBlobStore::new(credential, "flood", None).unwrap()
    }

    #[tokio::test]
    async fn stalled_request_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let credential = format!("BlobEndpoint=http://{addr}/;SharedAccessSignature=sv=1&sig=x")
            .parse()
            .unwrap();
        let store =
            AzureBlobStore::new(credential, "flood", Some(Duration::from_millis(200))).unwrap();

        let err = store
            .put_block("data.bin", &BlockId::encode(0), Bytes::from_static(b"block"))
            .await
            .unwrap_err();
        let StoreError::Reqwest { cause, .. } = &err else {
            panic!("expected a request error, got {err:?}");
        };
        assert!(cause.is_timeout());
    }

    #[test]
    fn block_url_encodes_id() {
        let id = BlockId::encode(u32::MAX - 1);
        let url = store()
            .url(Some("data.bin"), &[("comp", "block"), ("blockid", id.as_str())])
            .unwrap();

        assert_eq!(url.path(), "/flood/data.bin");
        let query = url.query().unwrap();
        assert!(query.starts_with("sv=2022-11-02&sig=a%2Bb&comp=block&blockid="));
        let blockid = url
            .query_pairs()
            .find(|(k, _)| k == "blockid")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(blockid, id.as_str());
    }

    #[test]
    fn container_url() {
        let url = store().url(None, &[("restype", "container")]).unwrap();
        assert_eq!(url.path(), "/flood");
        assert!(url.query().unwrap().ends_with("&restype=container"));
    }

    #[test]
    fn block_list_body() {
        let xml = block_list_xml(&[BlockId::encode(0), BlockId::encode(1)]);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>\
             <Latest>AAAAAA==</Latest><Latest>AAAAAQ==</Latest></BlockList>"
        );
    }

    #[test]
    fn parses_uncommitted_listing() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
            <BlockList>
              <CommittedBlocks><Block><Name>AAAAAg==</Name><Size>4</Size></Block></CommittedBlocks>
              <UncommittedBlocks>
                <Block><Name>AAAAAA==</Name><Size>4</Size></Block>
                <Block><Name>AAAAAQ==</Name><Size>4</Size></Block>
              </UncommittedBlocks>
            </BlockList>"#;

        let ids = parse_uncommitted_blocks(body);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&BlockId::encode(0)));
        assert!(ids.contains(&BlockId::encode(1)));
        assert!(!ids.contains(&BlockId::encode(2)));
    }

    #[test]
    fn parses_empty_listing() {
        let body = "<BlockList><UncommittedBlocks /></BlockList>";
        assert!(parse_uncommitted_blocks(body).is_empty());
    }
}
