use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::sync::{
	ChangeSet, ChangesQuery, DbVersion, SiteId, SyncError, Tables, VersionedChangesSyncStore,
};
use crate::transport::messages::{
	ErrorBody, LastReceivedVersionRequest, LastReceivedVersionResponse, SiteInfo,
};

/// [`VersionedChangesSyncStore`] backed by a remote sync store endpoint.
#[derive(Debug, Clone)]
pub struct HttpSyncStoreClient {
	base_url: Url,
	http: Client,
}

impl HttpSyncStoreClient {
	/// Every request made by the client fails with `SyncError::Transport`
	/// once `timeout` elapses.
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
		let mut base_url = Url::parse(base_url)
			.map_err(|e| SyncError::Configuration(format!("invalid remote url '{}': {}", base_url, e)))?;
		// Url::join replaces the last segment unless the path ends in '/'
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());
			base_url.set_path(&path);
		}
		let http = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {}", e)))?;
		Ok(Self { base_url, http })
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn url(&self, path: &str) -> Result<Url, SyncError> {
		self.base_url
			.join(path)
			.map_err(|e| SyncError::Configuration(format!("invalid endpoint path '{}': {}", path, e)))
	}

	async fn send(&self, request: RequestBuilder, expected: StatusCode) -> Result<Response, SyncError> {
		let response = request.send().await?;
		let status = response.status();
		if status == expected {
			return Ok(response);
		}
		let text = response.text().await.unwrap_or_default();
		let message = serde_json::from_str::<ErrorBody>(&text)
			.map(|b| b.error)
			.unwrap_or(text);
		Err(SyncError::Transport(format!(
			"unexpected status {} from remote: {}",
			status, message
		)))
	}

	async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
		let response = self.send(request, StatusCode::OK).await?;
		Ok(response.json::<T>().await?)
	}
}

#[async_trait]
impl VersionedChangesSyncStore for HttpSyncStoreClient {
	async fn setup_table_change_tracking(&self, tables: &Tables) -> Result<(), SyncError> {
		let request = self
			.http
			.post(self.url("setup-table-change-tracking")?)
			.json(tables);
		self.send(request, StatusCode::NO_CONTENT).await?;
		Ok(())
	}

	async fn get_site_id(&self) -> Result<SiteId, SyncError> {
		let info: SiteInfo = self.get_json(self.http.get(self.url("site-id")?)).await?;
		Ok(info.site_id)
	}

	async fn get_last_received_version(&self, peer: &SiteId) -> Result<DbVersion, SyncError> {
		let request = self
			.http
			.get(self.url("last-received-version")?)
			.query(&LastReceivedVersionRequest { from_site_id: *peer });
		let response: LastReceivedVersionResponse = self.get_json(request).await?;
		Ok(response.version)
	}

	async fn get_changes(&self, query: &ChangesQuery) -> Result<ChangeSet, SyncError> {
		let request = self.http.get(self.url("changes")?).query(query);
		let set: ChangeSet = self.get_json(request).await?;
		debug!("Fetched {} changes from {}", set.len(), self.base_url);
		Ok(set)
	}

	async fn apply_changes(&self, set: &ChangeSet) -> Result<(), SyncError> {
		let request = self.http.post(self.url("changes")?).json(set);
		self.send(request, StatusCode::NO_CONTENT).await?;
		debug!("Sent {} changes to {}", set.len(), self.base_url);
		Ok(())
	}

	async fn ping(&self) -> Result<(), SyncError> {
		self.send(self.http.get(self.url("health")?), StatusCode::OK)
			.await?;
		Ok(())
	}
}
