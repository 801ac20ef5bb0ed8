mod text;

pub use text::handle_message;
