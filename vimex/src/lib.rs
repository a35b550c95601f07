//! A client for the Vimeo API: OAuth 2.0 credential acquisition and resumable uploads.
//!
//! ```no_run
//! # async fn run() -> vimex::Result<()> {
//! use vimex::oauth::{ClientCredentials, DeviceCodeFlow};
//! use vimex::{VideoMetadata, VimeoClient};
//!
//! let credentials = ClientCredentials::new("client id", "client secret");
//! let client = VimeoClient::new().with_auth(DeviceCodeFlow::new(credentials));
//!
//! let file = tokio::fs::File::open("holiday.mp4").await?;
//! let uri = client
//!     .tus_upload(file, Some(8 * 1024 * 1024), &VideoMetadata::new().with_name("Holiday"))
//!     .await?;
//! println!("uploaded {uri}");
//! # Ok(())
//! # }
//! ```
//!
//! Every request sent through a client first passes its authentication hook, which acquires a
//! token on first use and caches it. If no token can be had the request goes out without one.
//! Both an async ([`VimeoClient`]) and a blocking ([`BlockingVimeoClient`]) client are provided;
//! they share the flows' decision logic and behave identically.

pub mod client;
pub mod config;
pub mod error;
pub mod oauth;
pub mod upload;

pub use client::{BlockingVimeoClient, VimeoClient};
pub use config::Endpoints;
pub use error::{Error, Result};
pub use upload::{
    ChunkUpload, PendingUpload, PrivacyView, UploadApproach, UploadSession, VideoMetadata,
};
