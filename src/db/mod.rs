mod repository;
mod schema;
mod settings;

pub use repository::Repository;
