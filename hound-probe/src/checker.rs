//! Platform checker contract and the shared page-probe plumbing
//!
//! Built-in checkers fetch one page per identifier variation and hand it to a
//! detection function. Everything around that decision (URL building, phone
//! variations, timing, metadata, the unreliable downgrade) lives in [`PageProbe`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use hound_core::{
    phone_variations, IdentifierKind, IndeterminateReason, Platform, ProbeRequest, ProfileResult,
};
use hound_net::{FetchRequest, FetchResponse, Fetcher};

use crate::{CheckerError, MetadataExtractor};

/// Decides whether an identifier exists on one platform
#[async_trait]
pub trait PlatformChecker: Send + Sync {
    fn platform(&self) -> &Platform;

    /// False once the sentinel identifier also read as present
    fn is_reliable(&self) -> bool {
        true
    }

    /// Never fails: problems come back as indeterminate results
    async fn check(&self, identifier: &str, kind: IdentifierKind) -> ProfileResult;
}

/// What one fetched page says about an identifier
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Exists,
    Absent,
    Indeterminate(IndeterminateReason),
}

/// Fetch-then-detect plumbing shared by the built-in checkers
pub struct PageProbe {
    platform: Arc<Platform>,
    fetcher: Arc<Fetcher>,
    extractor: MetadataExtractor,
}

impl PageProbe {
    pub fn new(platform: Arc<Platform>, fetcher: Arc<Fetcher>) -> Result<Self, CheckerError> {
        let extractor = MetadataExtractor::new(&platform.name, &platform.metadata)?;
        Ok(Self {
            platform,
            fetcher,
            extractor,
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Probe every variation of `identifier`, stopping at the first that exists
    pub async fn run<D>(
        &self,
        identifier: &str,
        kind: IdentifierKind,
        reliable: bool,
        detect: D,
    ) -> ProfileResult
    where
        D: Fn(&str, &str, &FetchResponse) -> Detection + Send + Sync,
    {
        let request = ProbeRequest::new(&self.platform, identifier, kind);
        let variations = match kind {
            IdentifierKind::Phone => phone_variations(&request.identifier),
            _ => vec![request.identifier.clone()],
        };

        let mut absent: Option<ProfileResult> = None;
        let mut unresolved: Option<ProfileResult> = None;

        for variation in &variations {
            let result = self.probe_once(&request, variation, reliable, &detect).await;
            if result.exists {
                return result;
            }
            if result.is_indeterminate() {
                unresolved.get_or_insert(result);
            } else {
                absent.get_or_insert(result);
            }
        }

        // Absence is only confirmed when no variation was left undecided
        match (unresolved, absent) {
            (Some(result), _) => result,
            (None, Some(result)) => result,
            (None, None) => {
                let url = self.platform.build_url(&request.identifier, kind);
                ProfileResult::indeterminate(
                    &request,
                    &url,
                    IndeterminateReason::Fatal {
                        message: "identifier is empty after normalization".to_string(),
                    },
                )
            }
        }
    }

    async fn probe_once<D>(
        &self,
        request: &ProbeRequest,
        variation: &str,
        reliable: bool,
        detect: &D,
    ) -> ProfileResult
    where
        D: Fn(&str, &str, &FetchResponse) -> Detection + Send + Sync,
    {
        let url = self.platform.build_url(variation, request.kind);
        let fetch = FetchRequest::for_platform(&self.platform, &url);

        let response = match self.fetcher.fetch(&fetch).await.into_result() {
            Ok(response) => response,
            Err(e) => {
                debug!("{} probe for {} failed: {}", self.platform.name, variation, e);
                return ProfileResult::indeterminate(request, &url, e.to_reason());
            }
        };

        let latency_ms = response.elapsed.as_millis() as u64;
        let result = match detect(&url, variation, &response) {
            Detection::Exists => {
                let found = ProfileResult::found(request, &url)
                    .with_metadata(self.extractor.extract(&response.body));
                if reliable {
                    found
                } else {
                    found.mark_unreliable()
                }
            }
            Detection::Absent => ProfileResult::absent(request, &url),
            Detection::Indeterminate(reason) => ProfileResult::indeterminate(request, &url, reason),
        };

        result.with_status(response.status).with_latency_ms(latency_ms)
    }

    /// Probe the sentinel identifier; true when the platform claims it exists
    pub async fn sentinel_reads_exists<D>(&self, sentinel: &str, detect: D) -> bool
    where
        D: Fn(&str, &str, &FetchResponse) -> Detection + Send + Sync,
    {
        let kind = self
            .platform
            .kinds
            .first()
            .copied()
            .unwrap_or(IdentifierKind::Username);
        let request = ProbeRequest::new(&self.platform, sentinel, kind);
        let result = self.probe_once(&request, &request.identifier, true, &detect).await;

        if result.exists {
            info!(
                "{} reports sentinel '{}' as existing, downgrading its positives",
                self.platform.name, sentinel
            );
            true
        } else {
            if let Some(reason) = &result.indeterminate {
                debug!("{} sentinel probe inconclusive: {}", self.platform.name, reason);
            }
            false
        }
    }
}

/// An improbable identifier for platforms without a declared sentinel
pub fn generated_sentinel() -> String {
    format!("th{}", &uuid::Uuid::new_v4().simple().to_string()[..14])
}
