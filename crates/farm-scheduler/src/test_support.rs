use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use semver::Version;

use crate::VersionSource;

/// Version source returning a scripted sequence of answers, then the
/// current version forever.
pub(crate) struct ScriptedSource {
    current: Version,
    answers: Mutex<Vec<Result<Version, String>>>,
    pub(crate) checks: AtomicU32,
    pub(crate) applied: Mutex<Option<Version>>,
    pub(crate) fail_apply: bool,
}

impl ScriptedSource {
    pub(crate) fn new(current: &str, answers: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self::build(current, answers, false))
    }

    pub(crate) fn failing_apply(current: &str, answers: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self::build(current, answers, true))
    }

    fn build(current: &str, answers: Vec<Result<&str, &str>>, fail_apply: bool) -> Self {
        let mut answers: Vec<_> = answers
            .into_iter()
            .map(|a| match a {
                Ok(v) => Ok(Version::parse(v).unwrap()),
                Err(e) => Err(e.to_string()),
            })
            .collect();
        answers.reverse();
        Self {
            current: Version::parse(current).unwrap(),
            answers: Mutex::new(answers),
            checks: AtomicU32::new(0),
            applied: Mutex::new(None),
            fail_apply,
        }
    }
}

#[async_trait]
impl VersionSource for ScriptedSource {
    fn current_version(&self) -> Version {
        self.current.clone()
    }

    async fn latest_version(&self) -> Result<Version> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop();
        match next {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(self.current.clone()),
        }
    }

    async fn apply_update(&self, version: &Version) -> Result<()> {
        if self.fail_apply {
            anyhow::bail!("no asset for this platform");
        }
        *self.applied.lock().unwrap() = Some(version.clone());
        Ok(())
    }
}
