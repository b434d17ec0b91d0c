//! External service ports used by the cart components.

pub mod product;

pub use product::{InMemoryProductService, ProductService, ProductServiceError};
