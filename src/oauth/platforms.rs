use serde_json::Value;

/// Static OAuth2 description of one social platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Platform {
    pub id: &'static str,
    pub name: &'static str,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    /// Plain PKCE using the state as verifier.
    pub pkce: bool,
    /// Profile endpoint called with the fresh access token.
    pub userinfo_url: Option<&'static str>,
}

/// Account details shown next to a connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_url: Option<String>,
}

fn text(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Platform {
    /// Read the platform's profile payload.
    pub fn profile(&self, body: &Value) -> Profile {
        match self.id {
            "discord" => {
                let username = text(body, "/username").map(|name| {
                    match text(body, "/discriminator").filter(|d| d != "0") {
                        Some(tag) => format!("{name}#{tag}"),
                        None => name,
                    }
                });
                Profile { username, email: text(body, "/email"), profile_url: None }
            }
            "twitter" => {
                let handle = text(body, "/data/username");
                Profile {
                    username: handle.as_ref().map(|h| format!("@{h}")),
                    email: None,
                    profile_url: handle.map(|h| format!("https://twitter.com/{h}")),
                }
            }
            _ => Profile {
                username: text(body, "/name"),
                email: text(body, "/email"),
                profile_url: text(body, "/link"),
            },
        }
    }
}

pub const PLATFORMS: &[Platform] = &[
    Platform {
        id: "youtube",
        name: "YouTube",
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        scopes: &[
            "https://www.googleapis.com/auth/youtube.readonly",
            "https://www.googleapis.com/auth/youtube.upload",
        ],
        pkce: false,
        userinfo_url: Some("https://www.googleapis.com/oauth2/v2/userinfo"),
    },
    Platform {
        id: "facebook",
        name: "Facebook",
        authorize_url: "https://www.facebook.com/v18.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
        scopes: &["pages_manage_posts", "pages_read_engagement"],
        pkce: false,
        userinfo_url: Some("https://graph.facebook.com/v18.0/me?fields=name,email,link"),
    },
    Platform {
        id: "linkedin",
        name: "LinkedIn",
        authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
        token_url: "https://www.linkedin.com/oauth/v2/accessToken",
        scopes: &["r_liteprofile", "w_member_social"],
        pkce: false,
        userinfo_url: None,
    },
    Platform {
        id: "twitter",
        name: "Twitter/X",
        authorize_url: "https://twitter.com/i/oauth2/authorize",
        token_url: "https://api.twitter.com/2/oauth2/token",
        scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
        pkce: true,
        userinfo_url: Some("https://api.twitter.com/2/users/me"),
    },
    Platform {
        id: "discord",
        name: "Discord",
        authorize_url: "https://discord.com/api/oauth2/authorize",
        token_url: "https://discord.com/api/oauth2/token",
        scopes: &["identify", "guilds"],
        pkce: false,
        userinfo_url: Some("https://discord.com/api/users/@me"),
    },
    Platform {
        id: "slack",
        name: "Slack",
        authorize_url: "https://slack.com/oauth/v2/authorize",
        token_url: "https://slack.com/api/oauth.v2.access",
        scopes: &["chat:write", "channels:read", "users:read"],
        pkce: false,
        userinfo_url: None,
    },
];

pub fn platform(id: &str) -> Option<&'static Platform> {
    PLATFORMS.iter().find(|p| p.id == id)
}
