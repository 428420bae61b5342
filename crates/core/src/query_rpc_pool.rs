use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alloy_provider::DynProvider;
use alloy_transport::TransportError;
use rand::prelude::IndexedRandom;
use url::Url;

use crate::provider::build_provider;

#[derive(Clone)]
pub struct ProviderHandle {
    pub index: usize,
    pub url: Url,
    pub provider: DynProvider,
}

struct ProviderEntry {
    url: Url,
    provider: DynProvider,
}

/// Set of interchangeable query endpoints. A provider that misbehaves is
/// parked for `cooldown` and the others are preferred until it expires.
pub struct QueryRpcPool {
    providers: Vec<ProviderEntry>,
    cooldown: Duration,
    cooldowns: Mutex<HashMap<usize, Instant>>,
}

impl QueryRpcPool {
    pub async fn connect(urls: &[Url], cooldown: Duration) -> Result<Self, TransportError> {
        let mut providers = Vec::with_capacity(urls.len());
        for url in urls {
            providers.push((url.clone(), build_provider(url).await?));
        }
        Ok(Self::from_providers(providers, cooldown))
    }

    #[must_use]
    pub fn from_providers(providers: Vec<(Url, DynProvider)>, cooldown: Duration) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|(url, provider)| ProviderEntry { url, provider })
                .collect(),
            cooldown,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Picks a random provider outside its cooldown. When every provider is
    /// cooling down, the one that recovers first is returned instead.
    #[must_use]
    pub fn random_provider(&self) -> Option<ProviderHandle> {
        if self.providers.is_empty() {
            return None;
        }

        let now = Instant::now();
        let mut cooldowns = self
            .cooldowns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cooldowns.retain(|_, until| *until > now);

        let available: Vec<usize> = (0..self.providers.len())
            .filter(|index| !cooldowns.contains_key(index))
            .collect();
        let index = match available.choose(&mut rand::rng()) {
            Some(index) => *index,
            None => cooldowns
                .iter()
                .min_by_key(|(_, until)| **until)
                .map(|(index, _)| *index)?,
        };
        Some(self.handle(index))
    }

    pub fn mark_bad_provider(&self, handle: &ProviderHandle) {
        let until = Instant::now() + self.cooldown;
        let mut cooldowns = self
            .cooldowns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cooldowns.insert(handle.index, until);
    }

    #[cfg(test)]
    pub(crate) fn is_cooling_down(&self, index: usize) -> bool {
        let cooldowns = self
            .cooldowns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cooldowns
            .get(&index)
            .is_some_and(|until| *until > Instant::now())
    }

    fn handle(&self, index: usize) -> ProviderHandle {
        let entry = &self.providers[index];
        ProviderHandle {
            index,
            url: entry.url.clone(),
            provider: entry.provider.clone(),
        }
    }
}
