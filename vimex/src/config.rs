//! Platform endpoints and protocol constants.

use url::Url;

/// Root of the Vimeo REST API.
pub const API_ROOT: &str = "https://api.vimeo.com";

/// Media type every Vimeo API request should accept, pinning the API version.
pub const API_ACCEPT: &str = "application/vnd.vimeo.*+json;version=3.4";

/// The fixed set of Vimeo URLs used by the OAuth flows and the upload engine.
///
/// [`Endpoints::default`] points at the production API. Use [`Endpoints::with_root`] to target a
/// different host, e.g. a mock server in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Token endpoint of the client-credentials grant.
    pub client_credentials: Url,
    /// Browser-navigated authorization page of the code and implicit grants.
    pub authorize: Url,
    /// Token endpoint that exchanges an authorization code.
    pub access_token: Url,
    /// Device-code endpoint of the device grant.
    pub device: Url,
    /// Video creation endpoint that negotiates upload sessions.
    pub videos: Url,
}

impl Endpoints {
    /// Builds the endpoint set relative to the given API root.
    pub fn with_root(root: &str) -> Result<Self, url::ParseError> {
        let mut root = Url::parse(root)?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        Ok(Self {
            client_credentials: root.join("oauth/authorize/client")?,
            authorize: root.join("oauth/authorize")?,
            access_token: root.join("oauth/access_token")?,
            device: root.join("oauth/device")?,
            videos: root.join("me/videos")?,
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::with_root(API_ROOT).expect("static API root is a valid URL")
    }
}
