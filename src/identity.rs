//! Identity resolution: chat id → registered bot user → system user → customer.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::{RecordStore, StoreResult};
use crate::models::Identity;

pub struct IdentityResolver {
    store: Arc<dyn RecordStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Resolve who is behind `chat_id`, fresh from the store.
    ///
    /// Missing links leave the corresponding field empty; only store failures
    /// are errors.
    pub async fn resolve(&self, chat_id: i64) -> StoreResult<Identity> {
        let Some(link) = self.store.find_telegram_user(chat_id).await? else {
            debug!(chat_id, "Chat is not registered");
            return Ok(Identity::unregistered(chat_id));
        };

        let customer = match link.customer.as_deref() {
            Some(customer_id) => {
                let customer = self.store.get_customer(customer_id).await?;
                if customer.is_none() {
                    warn!(chat_id, customer_id, "Registered chat links to a missing customer");
                }
                customer
            }
            None => None,
        };

        Ok(Identity {
            chat_id,
            system_user: link.user,
            customer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::models::{Customer, TelegramUser};

    fn resolver_with(store: MemoryStore) -> IdentityResolver {
        IdentityResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_unregistered_chat_resolves_empty() {
        let resolver = resolver_with(MemoryStore::new());
        let identity = resolver.resolve(99).await.unwrap();
        assert_eq!(identity, Identity::unregistered(99));
    }

    #[tokio::test]
    async fn test_full_join() {
        let store = MemoryStore::new();
        store.upsert_customer(Customer {
            id: "CUST-1".to_string(),
            name: "Budi Santoso".to_string(),
        });
        store.register_telegram_user(TelegramUser {
            telegram_user_id: 42,
            user: Some("budi@example.com".to_string()),
            customer: Some("CUST-1".to_string()),
        });

        let identity = resolver_with(store).resolve(42).await.unwrap();
        assert_eq!(identity.system_user.as_deref(), Some("budi@example.com"));
        assert_eq!(identity.customer.unwrap().name, "Budi Santoso");
    }

    #[tokio::test]
    async fn test_dangling_customer_link_is_not_an_error() {
        let store = MemoryStore::new();
        store.register_telegram_user(TelegramUser {
            telegram_user_id: 42,
            user: None,
            customer: Some("CUST-GONE".to_string()),
        });

        let identity = resolver_with(store).resolve(42).await.unwrap();
        assert!(identity.customer.is_none());
        assert!(identity.system_user.is_none());
    }
}
