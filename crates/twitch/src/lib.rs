pub mod helix;
pub mod hub;
pub mod oauth;

pub use helix::{HelixClient, HelixError, HelixGame, HelixStream, HelixUser};
pub use hub::{HubClient, HubError, HubMode, HubRequest};
pub use oauth::{OAuthError, TokenResponse, TwitchOAuthClient};
