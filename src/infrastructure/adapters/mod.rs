pub mod file_store;
pub mod http_query;
