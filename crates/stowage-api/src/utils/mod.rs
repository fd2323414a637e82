pub mod content_type;
pub mod ip_extraction;
pub mod upload;
