//! Body-pattern detection

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

use hound_core::{IdentifierKind, IndeterminateReason, Platform, ProfileResult};
use hound_net::{FetchResponse, Fetcher};

use crate::{CheckerError, Detection, PageProbe, PlatformChecker};

pub struct PatternChecker {
    probe: PageProbe,
    exists: Option<Regex>,
    absent: Option<Regex>,
    reliable: bool,
}

impl PatternChecker {
    pub fn new(platform: Arc<Platform>, fetcher: Arc<Fetcher>) -> Result<Self, CheckerError> {
        let compile = |pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|source| CheckerError::InvalidPattern {
                        platform: platform.name.clone(),
                        pattern: p.to_string(),
                        source,
                    })
                })
                .transpose()
        };
        let exists = compile(&platform.exists_pattern)?;
        let absent = compile(&platform.absent_pattern)?;
        if exists.is_none() && absent.is_none() {
            return Err(CheckerError::Unsupported(format!(
                "{} uses pattern detection without patterns",
                platform.name
            )));
        }

        Ok(Self {
            probe: PageProbe::new(platform, fetcher)?,
            exists,
            absent,
            reliable: true,
        })
    }

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

    /// Both or neither pattern matching is ambiguous. With a single declared
    /// pattern, a miss on the exists pattern reads as absent and a miss on the
    /// absent pattern defers to the exists status set.
    pub fn detect(&self, _url: &str, _identifier: &str, response: &FetchResponse) -> Detection {
        let body = &response.body;
        let exists = self.exists.as_ref().map(|re| re.is_match(body));
        let absent = self.absent.as_ref().map(|re| re.is_match(body));

        match (exists, absent) {
            (Some(true), Some(false)) | (Some(true), None) => Detection::Exists,
            (Some(false), Some(true)) | (None, Some(true)) => Detection::Absent,
            (Some(true), Some(true)) | (Some(false), Some(false)) => {
                Detection::Indeterminate(IndeterminateReason::Ambiguous)
            }
            (Some(false), None) => Detection::Absent,
            (None, Some(false)) => {
                if self.probe.platform().exists_status.contains(&response.status) {
                    Detection::Exists
                } else {
                    Detection::Indeterminate(IndeterminateReason::Ambiguous)
                }
            }
            (None, None) => Detection::Indeterminate(IndeterminateReason::Ambiguous),
        }
    }
}

#[async_trait]
impl PlatformChecker for PatternChecker {
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
