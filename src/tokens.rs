//! Tokens: single-flight access-token refresh backed by secure storage —
//! a reusable coordination primitive built on the same primitives as the
//! rest of the core (shared futures for single-flight, same shape as
//! `src/modifiers/dedup.rs`).

use async_trait::async_trait;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The durable key/value collaborator: map-like `[key] <-> Bytes?`,
/// with out-of-process mutation allowed (a platform
/// keychain binding may be edited by another process entirely). The
/// core never assumes it owns exclusive access.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>);
    async fn remove(&self, key: &str);
}

/// An in-memory [`SecureStorage`] for tests and demos.
#[derive(Default)]
pub struct InMemorySecureStorage {
    entries: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStorage for InMemorySecureStorage {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.lock().insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Performs the actual network round-trip: exchanges the current
/// refresh token (if any) for a fresh access token and, optionally, a
/// rotated refresh token.
#[async_trait]
pub trait TokenLoader<E>: Send + Sync {
    async fn load(&self, refresh_token: Option<String>) -> Result<(String, Option<String>), E>;
}

type BoxResultFuture<E> = Pin<Box<dyn Future<Output = Result<String, E>> + Send>>;
type SharedResultFuture<E> = Shared<BoxResultFuture<E>>;

const REFRESH_TOKEN_KEY: &str = "opcore.tokens.refresh_token";

/// Single-flight access-token refresh.
///
/// Two concurrent [`Tokens::load`] calls while a refresh is already in
/// flight share the same network round-trip instead of issuing two —
/// the same single-flight shape as [`crate::modifiers::dedup::Deduplicated`],
/// specialised to the tokens use case (no cancellation ref-counting:
/// a refresh in flight always runs to completion once started, since
/// abandoning it would leave every other awaiter without a token).
pub struct Tokens<E> {
    secure_storage: Arc<dyn SecureStorage>,
    access: Mutex<Option<String>>,
    inflight: Mutex<Option<SharedResultFuture<E>>>,
}

impl<E> Tokens<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(secure_storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            secure_storage,
            access: Mutex::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// If a refresh is already in flight, awaits its shared result.
    /// Otherwise starts one: reads the current refresh token from
    /// secure storage, calls `loader.load`, and on success persists the
    /// (possibly rotated) refresh token and caches the access token
    /// before resolving every awaiter. On failure, every awaiter
    /// observes the error and the in-flight slot is cleared so the next
    /// call starts a fresh attempt.
    pub async fn load(&self, loader: Arc<dyn TokenLoader<E>>) -> Result<String, E> {
        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(shared) = inflight.as_ref() {
                shared.clone()
            } else {
                let current_refresh = self.secure_storage.get(REFRESH_TOKEN_KEY).await.map(|bytes| {
                    String::from_utf8(bytes).unwrap_or_default()
                });

                let secure_storage = Arc::clone(&self.secure_storage);
                let body: BoxResultFuture<E> = Box::pin(async move {
                    let (access_token, refresh_token) = loader.load(current_refresh).await?;
                    if let Some(refresh_token) = refresh_token {
                        secure_storage.set(REFRESH_TOKEN_KEY, refresh_token.into_bytes()).await;
                    }
                    Ok(access_token)
                });
                let new_shared = body.shared();
                *inflight = Some(new_shared.clone());
                new_shared
            }
        };

        let result = shared.await;
        // Whoever observes the result first (of potentially many
        // awaiters) clears the slot so a subsequent `load` call — success
        // or failure — starts a fresh attempt rather than replaying this
        // one forever.
        {
            let mut inflight = self.inflight.lock();
            if inflight.as_ref().map(|s| s.ptr_eq(&shared)).unwrap_or(false) {
                *inflight = None;
            }
        }

        if let Ok(access_token) = &result {
            *self.access.lock() = Some(access_token.clone());
        }
        result
    }

    /// Snapshot of the cached access token and the secure-storage-backed
    /// refresh token, for attaching to an outgoing request.
    pub async fn bearer_values(&self) -> (Option<String>, Option<String>) {
        let access = self.access.lock().clone();
        let refresh = self
            .secure_storage
            .get(REFRESH_TOKEN_KEY)
            .await
            .map(|bytes| String::from_utf8(bytes).unwrap_or_default());
        (access, refresh)
    }

    /// Wipes the in-memory access token and deletes the refresh token
    /// from secure storage (e.g. on sign-out).
    pub async fn clear(&self) {
        *self.access.lock() = None;
        self.secure_storage.remove(REFRESH_TOKEN_KEY).await;
    }
}
