//! Upstream entity sources
//!
//! The cache never talks to the network itself; handlers hand it fetch
//! closures built on an [`EntitySource`].

use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, Url};

use crate::models::wire::{decode_neurons, ListSnsesResponse};
use crate::models::{Neuron, SnsDescriptor};

/// Remote provider of governance entities.
pub trait EntitySource: Send + Sync {
    /// Neurons of `governance` listed for `owner`.
    fn list_neurons(
        &self,
        owner: &str,
        governance: &str,
    ) -> BoxFuture<'static, anyhow::Result<Vec<Neuron>>>;

    /// The SNS directory.
    fn list_snses(&self) -> BoxFuture<'static, anyhow::Result<Vec<SnsDescriptor>>>;
}

// == HTTP Source ==
/// [`EntitySource`] backed by the governance gateway's JSON API.
#[derive(Debug, Clone)]
pub struct HttpEntitySource {
    client: Client,
    base: Url,
}

impl HttpEntitySource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("invalid upstream url {}", base_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("upstream url {} cannot be a base", base_url));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream client")?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("upstream url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl EntitySource for HttpEntitySource {
    fn list_neurons(
        &self,
        owner: &str,
        governance: &str,
    ) -> BoxFuture<'static, anyhow::Result<Vec<Neuron>>> {
        let client = self.client.clone();
        let url = self.endpoint(&["governance", governance, "neurons"]);
        let owner = owner.to_string();

        async move {
            let response = client
                .get(url?)
                .query(&[("owner", owner.as_str())])
                .send()
                .await
                .context("neuron listing request failed")?
                .error_for_status()?;
            let body: serde_json::Value = response
                .json()
                .await
                .context("neuron listing is not JSON")?;
            decode_neurons(body).context("unexpected neuron listing shape")
        }
        .boxed()
    }

    fn list_snses(&self) -> BoxFuture<'static, anyhow::Result<Vec<SnsDescriptor>>> {
        let client = self.client.clone();
        let url = self.endpoint(&["snses"]);

        async move {
            let listing: ListSnsesResponse = client
                .get(url?)
                .send()
                .await
                .context("SNS listing request failed")?
                .error_for_status()?
                .json()
                .await
                .context("unexpected SNS listing shape")?;
            Ok(listing.into_descriptors())
        }
        .boxed()
    }
}
