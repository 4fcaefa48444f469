//! # sovran-thc
//!
//! A thread-safe typed heterogeneous container.
//!
//! `sovran-thc` stores values of unrelated types in a single [`Container`] and hands
//! back a typed [`Key<T>`] for each one. The key is the only way back to the value,
//! and it remembers both which container issued it and what type was stored, so
//! retrieval always yields the original type or a well-defined error.
//!
//! ## Key Features
//!
//! - **Type-safe**: Keys carry the stored type; mismatches are errors, never UB
//! - **Thread-safe**: Built on `Arc<RwLock<_>>`; readers never block each other
//! - **Container-bound keys**: A key presented to the wrong container is rejected
//! - **Tombstoning**: Removing a value permanently invalidates the key used to remove it
//! - **No registry**: Any `Any + Send + Sync` type can be stored without declaring it first
//!
//! ## Usage Examples
//!
//! ### Basic Usage
//!
//! ```rust
//! use sovran_thc::{Container, ThcError};
//!
//! fn main() -> Result<(), ThcError> {
//!     let container = Container::new();
//!
//!     // Store values of different types
//!     let port = container.store(8080u16)?;
//!     let host = container.store("localhost".to_string())?;
//!     let tags = container.store(vec!["web", "api"])?;
//!
//!     // The key decides the type that comes back
//!     let port: u16 = container.fetch(&port)?;
//!     let host: String = container.fetch(&host)?;
//!     println!("Serving on {}:{}", host, port);
//!
//!     // Read without cloning
//!     let count = container.with(&tags, |tags| tags.len())?;
//!     assert_eq!(count, 2);
//!
//!     println!("{}", container); // Length: 3
//!     Ok(())
//! }
//! ```
//!
//! ### Removing Values
//!
//! ```rust
//! use sovran_thc::{Container, ThcError};
//!
//! let container = Container::new();
//! let mut key = container.store(42)?;
//!
//! container.remove(&mut key)?;
//!
//! // The key is tombstoned; every operation rejects it from now on
//! assert!(key.is_tombstoned());
//! assert_eq!(container.fetch(&key), Err(ThcError::Tombstoned));
//! assert_eq!(container.remove(&mut key), Err(ThcError::Tombstoned));
//! # Ok::<(), ThcError>(())
//! ```
//!
//! ### Sharing Between Threads
//!
//! ```rust
//! use sovran_thc::{Container, ThcError};
//! use std::thread;
//!
//! fn main() -> Result<(), ThcError> {
//!     let container = Container::new();
//!     let hits = container.store(0u64)?;
//!
//!     let handles: Vec<_> = (0..4)
//!         .map(|_| {
//!             // Clones are handles to the same container
//!             let container = container.clone();
//!             let hits = hits.clone();
//!             thread::spawn(move || container.with_mut(&hits, |n| *n += 1))
//!         })
//!         .collect();
//!
//!     for handle in handles {
//!         handle.join().expect("worker panicked")?;
//!     }
//!
//!     assert_eq!(container.fetch(&hits)?, 4);
//!     Ok(())
//! }
//! ```
//!
//! ### Error Handling
//!
//! ```rust
//! use sovran_thc::{Container, ThcError};
//!
//! let first = Container::new();
//! let second = Container::new();
//!
//! let key = match first.store(vec![1, 2, 3]) {
//!     Ok(key) => key,
//!     Err(e) => {
//!         eprintln!("Failed to store: {}", e);
//!         return;
//!     }
//! };
//!
//! match second.fetch(&key) {
//!     Ok(value) => println!("Value: {:?}", value),
//!     Err(ThcError::IdentityMismatch { .. }) => println!("Key belongs to another container"),
//!     Err(ThcError::Tombstoned) => println!("Key was removed"),
//!     Err(ThcError::NotFound(id)) => println!("Entry {} is gone", id),
//!     Err(e) => println!("Other error: {}", e),
//! }
//!
//! // A container can't hold itself
//! assert_eq!(first.store(first.clone()).unwrap_err(), ThcError::SelfContainment);
//! ```
//!
//! ## Cycles
//!
//! Only direct self-containment is rejected. A container stored in a second
//! container that is in turn stored in the first forms a reference cycle that is
//! neither detected nor collected. Nothing in this crate walks stored values, so
//! such a cycle never deadlocks, but it is an unsupported pattern.

mod container;
mod entry;
mod error;
mod ids;
mod key;

pub use container::Container;
pub use error::{Result, ThcError};
pub use ids::{ContainerId, EntryId};
pub use key::Key;
