//! saftbar: an X11 status bar fed by lemonbar-style markup on stdin

pub mod color;
pub mod compositor;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod font;
pub mod layout;
pub mod logging;
pub mod markup;
pub mod outputs;
pub mod platform;

pub use config::BarConfig;
pub use error::BarError;
pub use event_loop::Bar;
