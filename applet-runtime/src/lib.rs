//! Applet Runtime - host side of sandboxed script apps
//!
//! A script app is a small program exposing `init`, `view` and `update`.
//! This crate drives it:
//!
//! - **App host**: owns the script's state and UI, runs the boot sequence
//!   and the dispatch loop, and fails terminally on runtime errors
//! - **Effect dispatcher**: executes `icp_call` / `icp_batch` effects and
//!   turns every one of them into an `effect/result` message
//! - **Permission gate**: session allow-cache in front of every remote call,
//!   with deny / allow once / allow always prompts
//! - **UI interpreter**: turns the declarative node tree into widgets whose
//!   interactions come back as inbound messages
//!
//! The script interpreter and the remote call backend are external
//! collaborators behind the [`RuntimeBridge`] and [`CallBridge`] traits.
//! [`process`] provides command-backed implementations of both.
//!
//! ## Example
//!
//! ```no_run
//! use applet_runtime::{AppHost, CommandCallBridge, CommandRuntime, Config, FixedPrompt};
//! use applet_types::Decision;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_default("applet.yml")?;
//! let mut host = AppHost::new(
//!     Arc::new(CommandRuntime::from_config(&config)?),
//!     Arc::new(CommandCallBridge::from_config(&config)?),
//!     Arc::new(FixedPrompt(Decision::AllowOnce)),
//!     &config.host_config(),
//! );
//!
//! host.boot("function init() ... end", None).await?;
//! println!("{:?}", host.ui());
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod effects;
pub mod host;
pub mod permission;
pub mod process;
pub mod ui;

pub use bridge::{
    BridgeError, CallBridge, HostError, HostResult, LifecycleCall, LifecycleResponse, RemoteCall,
    RuntimeBridge,
};

pub use config::{Config, ConfigError, HostConfig};

pub use effects::{parse_response, EffectDispatcher};

pub use host::{AppHost, Frame, HostHandle, HostStatus};

pub use permission::{
    preview_args, CallSummary, ChannelPrompt, FixedPrompt, PendingPrompt, PermissionGate,
    PermissionPrompt, PermissionRequest,
};

pub use process::{CommandCallBridge, CommandRuntime};

pub use ui::{
    format_path, DataView, EventSink, Handler, ImageSource, InteractionError, ListItem, LoadState,
    Rendered, SelectOption, UiInterpreter, Widget,
};

#[cfg(test)]
mod tests;
