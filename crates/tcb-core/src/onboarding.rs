use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use crate::{
    credentials::CredentialStore,
    domain::{Credential, SetupInstructions},
    ports::OnboardingPort,
    Result,
};

const SETUP_TOKEN_BYTES: usize = 30;

#[derive(Debug, Default)]
struct OnboardingState {
    setup_complete: bool,
    otp: Option<String>,
}

/// One-time OAuth onboarding of the bot account.
///
/// Until credentials exist, the operator has to visit the setup URL (guarded
/// by a one-time token) and connect the bot's Twitch account.
pub struct Onboarding {
    host: String,
    store: CredentialStore,
    state: Mutex<OnboardingState>,
}

impl Onboarding {
    pub fn new(host: impl Into<String>, store: CredentialStore) -> Self {
        Self {
            host: host.into(),
            store,
            state: Mutex::new(OnboardingState::default()),
        }
    }

    pub fn instructions_for(&self, token: &str) -> SetupInstructions {
        let host = &self.host;
        SetupInstructions {
            token: token.to_string(),
            setup_url: format!("{host}/setup?token={token}"),
            redirect_urls: vec![
                format!("{host}/setup/callback"),
                format!("{host}/add/callback"),
                format!("{host}/remove/callback"),
            ],
        }
    }
}

#[async_trait]
impl OnboardingPort for Onboarding {
    async fn existing_credentials(&self) -> Result<Option<Credential>> {
        Ok(self.store.load_credential().await)
    }

    async fn begin_setup(&self) -> Result<SetupInstructions> {
        let token = generate_setup_token();
        self.state.lock().await.otp = Some(token.clone());

        let instructions = self.instructions_for(&token);
        println!("{}", render_banner(&instructions));
        tracing::info!("waiting for operator to finish setup at {}", instructions.setup_url);
        Ok(instructions)
    }

    async fn is_setup_complete(&self) -> bool {
        self.state.lock().await.setup_complete
    }

    async fn verify_setup_token(&self, candidate: &str) -> bool {
        let st = self.state.lock().await;
        match &st.otp {
            Some(otp) => !candidate.is_empty() && constant_time_eq(otp, candidate),
            None => false,
        }
    }

    async fn store_credentials(&self, credential: &Credential) -> Result<()> {
        self.store.store(credential).await
    }

    async fn mark_setup_complete(&self) {
        self.state.lock().await.setup_complete = true;
    }
}

fn generate_setup_token() -> String {
    let mut bytes = [0u8; SETUP_TOKEN_BYTES];
    rand::rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn render_banner(instructions: &SetupInstructions) -> String {
    let rule = "===================================================";
    let redirects = instructions
        .redirect_urls
        .iter()
        .map(|u| format!("   '{u}'"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{rule}\n\
Please make sure\n\
{redirects}\n\
are in the list of OAuth redirects of your Twitch-App!\n\n\
To connect the bot with its twitch account log in with it on twitch and visit\n\n\
'{}'.\n\n\
There you connect the twitch account with the bot\n\n\
This only needs to be done once.\n\
{rule}",
        instructions.setup_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tmp_path;

    fn onboarding(prefix: &str) -> Onboarding {
        Onboarding::new(
            "http://localhost:8080",
            CredentialStore::new(tmp_path(prefix).join("auth.json")),
        )
    }

    #[tokio::test]
    async fn begin_setup_issues_hex_token_and_urls() {
        let ob = onboarding("tcb-onboarding-begin");
        let ins = ob.begin_setup().await.unwrap();

        assert_eq!(ins.token.len(), SETUP_TOKEN_BYTES * 2);
        assert!(ins.token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            ins.setup_url,
            format!("http://localhost:8080/setup?token={}", ins.token)
        );
        assert_eq!(
            ins.redirect_urls,
            vec![
                "http://localhost:8080/setup/callback",
                "http://localhost:8080/add/callback",
                "http://localhost:8080/remove/callback",
            ]
        );
        assert!(ob.verify_setup_token(&ins.token).await);
        assert!(!ob.verify_setup_token("nope").await);
        assert!(!ob.verify_setup_token("").await);
    }

    #[tokio::test]
    async fn no_token_verifies_before_setup_begins() {
        let ob = onboarding("tcb-onboarding-none");
        assert!(!ob.verify_setup_token("").await);
        assert!(!ob.verify_setup_token("anything").await);
    }

    #[tokio::test]
    async fn stored_credentials_are_found_again() {
        let ob = onboarding("tcb-onboarding-store");
        assert_eq!(ob.existing_credentials().await.unwrap(), None);

        ob.store_credentials(&Credential::new("a", "r")).await.unwrap();
        assert_eq!(
            ob.existing_credentials().await.unwrap(),
            Some(Credential::new("a", "r"))
        );
        assert!(!ob.is_setup_complete().await);
        ob.mark_setup_complete().await;
        assert!(ob.is_setup_complete().await);
    }

    #[test]
    fn banner_lists_redirects_and_setup_url() {
        let ob = onboarding("tcb-onboarding-banner");
        let banner = render_banner(&ob.instructions_for("abc"));
        assert!(banner.contains("'http://localhost:8080/add/callback'"));
        assert!(banner.contains("'http://localhost:8080/setup?token=abc'"));
    }
}
