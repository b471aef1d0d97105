use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;

use super::{Credentials, Handle, Platform, PollOptions, Poller};
use crate::core::scope::{ProgramData, ScopeElement};
use crate::error::{PollError, Result};
use crate::http::{parse_url, Auth, HttpClient, HttpRequest};

const API_BASE: &str = "https://api.hackerone.com";
const PROGRAM_BASE: &str = "https://hackerone.com/";
const PAGE_SIZE: u32 = 100;
/// Upper bound on followed `next` links, in case the API keeps pointing at itself.
const MAX_PAGES: usize = 500;

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<Resource<T>>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct ProgramAttributes {
    handle: String,
    #[serde(default)]
    offers_bounties: bool,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ScopeAttributes {
    #[serde(default)]
    asset_identifier: String,
    #[serde(default)]
    asset_type: String,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    eligible_for_bounty: bool,
    #[serde(default)]
    eligible_for_submission: bool,
}

/// HackerOne hacker API (`/v1/hackers`), authenticated with username + API token.
pub struct HackerOnePoller {
    client: HttpClient,
    api_base: String,
    auth: RwLock<Option<Auth>>,
    max_pages: usize,
}

impl HackerOnePoller {
    pub fn new(client: HttpClient) -> Self {
        Self::with_api_base(client, API_BASE)
    }

    pub fn with_api_base(client: HttpClient, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth: RwLock::new(None),
            max_pages: MAX_PAGES,
        }
    }

    pub fn program_url(handle: &str) -> String {
        format!("{}{}", PROGRAM_BASE, handle)
    }

    fn current_auth(&self) -> Result<Auth> {
        self.auth
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| PollError::Auth {
                platform: Platform::HackerOne,
                reason: "not authenticated".to_string(),
            })
    }

    /// Follows `links.next` from `first_url`, collecting every page's attributes.
    ///
    /// A chain longer than `max_pages` is an error: a partial listing must not reach the diff.
    async fn collect_pages<T: serde::de::DeserializeOwned>(&self, first_url: String) -> Result<Option<Vec<T>>> {
        let auth = self.current_auth()?;
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > self.max_pages {
                warn!("hackerone: pagination still going after {} pages at {}", self.max_pages, url);
                return Err(PollError::Parse {
                    url,
                    reason: format!("more than {} pages, listing would be truncated", self.max_pages),
                });
            }

            let request = HttpRequest::get(parse_url(&url)?).with_auth(auth.clone());
            let response = self.client.send(&request).await?;
            if response.is_gone() {
                return Ok(None);
            }

            let page: Page<T> = response.json()?;
            items.extend(page.data.into_iter().map(|r| r.attributes));
            next = page.links.next.filter(|n| !n.is_empty());
        }

        Ok(Some(items))
    }
}

fn keep_listed(program: &ProgramAttributes, options: &PollOptions) -> bool {
    if options.bounty_only && !program.offers_bounties {
        return false;
    }
    if options.private_only && program.state == "public_mode" {
        return false;
    }
    true
}

fn to_program(handle: &str, scopes: Vec<ScopeAttributes>) -> ProgramData {
    let mut program = ProgramData::new(HackerOnePoller::program_url(handle));

    for scope in scopes {
        if scope.asset_identifier.trim().is_empty() {
            continue;
        }
        let element = ScopeElement::new(scope.asset_identifier.trim(), scope.asset_type)
            .with_description(scope.instruction.unwrap_or_default().trim())
            .bounty(scope.eligible_for_bounty);

        if scope.eligible_for_submission {
            program.in_scope.push(element);
        } else {
            program.out_of_scope.push(element);
        }
    }

    if program.in_scope.is_empty() {
        program.in_scope.push(ScopeElement::no_scope_table());
    }
    program
}

#[async_trait]
impl Poller for HackerOnePoller {
    fn platform(&self) -> Platform {
        Platform::HackerOne
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let (Some(username), Some(token)) = (&credentials.username, &credentials.token) else {
            return Err(PollError::Auth {
                platform: Platform::HackerOne,
                reason: "username and API token are required".to_string(),
            });
        };

        let auth = Auth::Basic {
            username: username.clone(),
            password: token.clone(),
        };

        // cheap call to validate the token before workers start
        let check_url = format!("{}/v1/hackers/programs?page%5Bsize%5D=1", self.api_base);
        let request = HttpRequest::get(parse_url(&check_url)?).with_auth(auth.clone());
        self.client.send(&request).await?;

        if let Ok(mut guard) = self.auth.write() {
            *guard = Some(auth);
        }
        info!("hackerone: authenticated as {}", username);
        Ok(())
    }

    async fn list_program_handles(&self, options: &PollOptions) -> Result<Vec<Handle>> {
        let first = format!(
            "{}/v1/hackers/programs?page%5Bsize%5D={}&page%5Bnumber%5D=1",
            self.api_base, PAGE_SIZE
        );
        let programs: Vec<ProgramAttributes> = self.collect_pages(first).await?.unwrap_or_default();
        let total = programs.len();

        let handles: Vec<Handle> = programs
            .into_iter()
            .filter(|p| keep_listed(p, options))
            .map(|p| p.handle)
            .collect();

        debug!("hackerone: {} of {} listed programs kept", handles.len(), total);
        Ok(super::dedup_handles(handles))
    }

    async fn fetch_program_scope(&self, handle: &str, options: &PollOptions) -> Result<ProgramData> {
        let first = format!(
            "{}/v1/hackers/programs/{}/structured_scopes?page%5Bsize%5D={}&page%5Bnumber%5D=1",
            self.api_base, handle, PAGE_SIZE
        );

        match self.collect_pages::<ScopeAttributes>(first).await? {
            Some(scopes) => Ok(to_program(handle, scopes).apply_options(options)),
            None => {
                debug!("hackerone: program {} no longer exists", handle);
                Ok(ProgramData::gone(Self::program_url(handle)))
            }
        }
    }

    fn handle_from_url(&self, url: &str) -> Option<Handle> {
        url.strip_prefix(PROGRAM_BASE)
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|h| !h.is_empty() && !h.contains('/'))
            .map(str::to_string)
    }
}
