//! Status-code detection
//!
//! The HTTP status is mapped onto the platform's "exists" and "absent" sets.
//! A status in the exists set still has to survive two false-positive checks:
//! a redirect that landed on the site root, and a "not found" page that never
//! mentions the identifier.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use hound_core::{IdentifierKind, IndeterminateReason, Platform, ProfileResult};
use hound_net::{redirected_to_root, FetchResponse, Fetcher};

use crate::{CheckerError, Detection, PageProbe, PlatformChecker};

static NOT_FOUND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:user|profile|account|page)[\s_-]?not[\s_-]?found\b|\berror[\s_-]?404\b")
        .unwrap()
});

pub struct StatusCodeChecker {
    probe: PageProbe,
    reliable: bool,
}

impl StatusCodeChecker {
    /// Uncalibrated checker; treated as reliable
    pub fn new(platform: Arc<Platform>, fetcher: Arc<Fetcher>) -> Result<Self, CheckerError> {
        Ok(Self {
            probe: PageProbe::new(platform, fetcher)?,
            reliable: true,
        })
    }

    /// Checker calibrated against a known-absent identifier
    pub async fn calibrated(
        platform: Arc<Platform>,
        fetcher: Arc<Fetcher>,
        sentinel: &str,
    ) -> Result<Self, CheckerError> {
        let mut checker = Self::new(platform, fetcher)?;
        let exists = checker
            .probe
            .sentinel_reads_exists(sentinel, |url, id, response| checker.detect(url, id, response))
            .await;
        checker.reliable = !exists;
        Ok(checker)
    }

    pub fn detect(&self, url: &str, identifier: &str, response: &FetchResponse) -> Detection {
        detect_status(self.probe.platform(), url, identifier, response)
    }
}

/// Status-code decision for one response
pub fn detect_status(
    platform: &Platform,
    url: &str,
    identifier: &str,
    response: &FetchResponse,
) -> Detection {
    let status = response.status;

    if platform.exists_status.contains(&status) {
        if redirected_to_root(url, &response.final_url) {
            debug!("{}: {} redirected to {}", platform.name, url, response.final_url);
            return Detection::Absent;
        }
        if NOT_FOUND_REGEX.is_match(&response.body)
            && !response.body.to_lowercase().contains(&identifier.to_lowercase())
        {
            debug!("{}: not-found page served with status {}", platform.name, status);
            return Detection::Absent;
        }
        Detection::Exists
    } else if platform.absent_status.contains(&status) {
        Detection::Absent
    } else {
        Detection::Indeterminate(IndeterminateReason::UnexpectedStatus { status })
    }
}

#[async_trait]
impl PlatformChecker for StatusCodeChecker {
    fn platform(&self) -> &Platform {
        self.probe.platform()
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    async fn check(&self, identifier: &str, kind: IdentifierKind) -> ProfileResult {
        self.probe
            .run(identifier, kind, self.reliable, |url, id, response| {
                self.detect(url, id, response)
            })
            .await
    }
}
