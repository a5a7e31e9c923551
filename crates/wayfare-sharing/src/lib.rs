pub mod cache;
pub mod error;
pub mod firestore;
pub mod grant;
pub mod lookup;
pub mod retry;
pub mod service;
pub mod store;

pub use cache::{CachedTrips, TripCache};
pub use error::SharingError;
pub use firestore::FirestoreDocumentStore;
pub use grant::{normalize_email, Permission, SharingGrant};
pub use lookup::Lookup;
pub use retry::RetryPolicy;
pub use service::{GrantWatch, SharingService};
pub use store::{encode, Document, DocumentStore, DocumentStream, Filter, InMemoryDocumentStore};
