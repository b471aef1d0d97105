use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

use super::{Credentials, Handle, Platform, PollOptions, Poller};
use crate::core::scope::{ProgramData, ScopeElement};
use crate::error::{PollError, Result};
use crate::http::{parse_url, Auth, HttpClient, HttpRequest};

const API_BASE: &str = "https://api.intigriti.com/external/researcher";
const PROGRAM_BASE: &str = "https://app.intigriti.com/researcher/programs/";
const PAGE_LIMIT: usize = 500;

const CONFIDENTIALITY_PUBLIC: u32 = 4;
const TYPE_BUG_BOUNTY: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgramList {
    #[serde(default)]
    max_count: usize,
    #[serde(default)]
    records: Vec<ListedProgram>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedProgram {
    id: String,
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    company_handle: Option<String>,
    #[serde(default)]
    confidentiality_level: Option<Label>,
    #[serde(rename = "type", default)]
    program_type: Option<Label>,
}

#[derive(Debug, Clone, Deserialize)]
struct Label {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgramDetail {
    handle: String,
    company_handle: String,
    #[serde(default)]
    domains: Option<Domains>,
}

#[derive(Debug, Deserialize)]
struct Domains {
    #[serde(default)]
    content: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
struct Domain {
    #[serde(default)]
    endpoint: String,
    #[serde(rename = "type", default)]
    domain_type: Option<Label>,
    #[serde(default)]
    tier: Option<Label>,
    #[serde(default)]
    description: Option<String>,
}

/// Intigriti researcher API, authenticated with a personal access token.
///
/// Handles are the API's program ids. Program pages are addressed by company
/// and program slug instead, so the poller remembers which page each id
/// lives at.
pub struct IntigritiPoller {
    client: HttpClient,
    api_base: String,
    token: RwLock<Option<String>>,
    pages: RwLock<HashMap<Handle, String>>,
}

impl IntigritiPoller {
    pub fn new(client: HttpClient) -> Self {
        Self::with_api_base(client, API_BASE)
    }

    pub fn with_api_base(client: HttpClient, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
            pages: RwLock::new(HashMap::new()),
        }
    }

    fn remember_page(&self, handle: &str, url: &str) {
        if let Ok(mut pages) = self.pages.write() {
            pages.insert(handle.to_string(), url.to_string());
        }
    }

    /// Page URL of `handle`, or the program base when it was never seen.
    fn page_for(&self, handle: &str) -> String {
        self.pages
            .read()
            .ok()
            .and_then(|pages| pages.get(handle).cloned())
            .unwrap_or_else(|| format!("{}{}", PROGRAM_BASE, handle))
    }

    fn auth(&self) -> Result<Auth> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .map(Auth::Bearer)
            .ok_or_else(|| PollError::Auth {
                platform: Platform::Intigriti,
                reason: "not authenticated".to_string(),
            })
    }

    async fn list_page(&self, auth: &Auth, offset: usize) -> Result<ProgramList> {
        let url = format!("{}/v1/programs?limit={}&offset={}", self.api_base, PAGE_LIMIT, offset);
        let request = HttpRequest::get(parse_url(&url)?).with_auth(auth.clone());
        self.client.send(&request).await?.json()
    }
}

fn keep_listed(program: &ListedProgram, options: &PollOptions) -> bool {
    if options.private_only
        && program
            .confidentiality_level
            .as_ref()
            .is_some_and(|c| c.id == CONFIDENTIALITY_PUBLIC)
    {
        return false;
    }
    if options.bounty_only && program.program_type.as_ref().map(|t| t.id) != Some(TYPE_BUG_BOUNTY) {
        return false;
    }
    true
}

fn page_url(company_handle: &str, handle: &str) -> String {
    format!("{}{}/{}/detail", PROGRAM_BASE, company_handle, handle)
}

fn to_program(detail: ProgramDetail) -> ProgramData {
    let mut program = ProgramData::new(page_url(&detail.company_handle, &detail.handle));

    let domains = detail.domains.map(|d| d.content).unwrap_or_default();
    for domain in domains {
        if domain.endpoint.trim().is_empty() {
            continue;
        }
        let tier = domain.tier.map(|t| t.value.to_lowercase()).unwrap_or_default();
        let category = domain.domain_type.map(|t| t.value).unwrap_or_default();
        let element = ScopeElement::new(domain.endpoint.trim(), category)
            .with_description(domain.description.unwrap_or_default().trim());

        match tier.as_str() {
            "out of scope" => program.out_of_scope.push(element),
            "no bounty" => program.in_scope.push(element.bounty(false)),
            _ => program.in_scope.push(element.bounty(true)),
        }
    }

    if program.in_scope.is_empty() {
        program.in_scope.push(ScopeElement::no_scope_table());
    }
    program
}

#[async_trait]
impl Poller for IntigritiPoller {
    fn platform(&self) -> Platform {
        Platform::Intigriti
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let Some(token) = credentials.token.clone().filter(|t| !t.is_empty()) else {
            return Err(PollError::Auth {
                platform: Platform::Intigriti,
                reason: "an API token is required".to_string(),
            });
        };

        let url = format!("{}/v1/programs?limit=1&offset=0", self.api_base);
        let request = HttpRequest::get(parse_url(&url)?).with_auth(Auth::Bearer(token.clone()));
        self.client.send(&request).await?;

        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token);
        }
        info!("intigriti: token accepted");
        Ok(())
    }

    async fn list_program_handles(&self, options: &PollOptions) -> Result<Vec<Handle>> {
        let auth = self.auth()?;
        let mut handles = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.list_page(&auth, offset).await?;
            let fetched = page.records.len();
            for program in page.records.into_iter().filter(|p| keep_listed(p, options)) {
                if let (Some(company), Some(handle)) = (&program.company_handle, &program.handle) {
                    self.remember_page(&program.id, &page_url(company, handle));
                }
                handles.push(program.id);
            }

            offset += fetched;
            if fetched == 0 || offset >= page.max_count {
                break;
            }
        }

        debug!("intigriti: {} programs listed", handles.len());
        Ok(super::dedup_handles(handles))
    }

    async fn fetch_program_scope(&self, handle: &str, options: &PollOptions) -> Result<ProgramData> {
        let auth = self.auth()?;
        let url = format!("{}/v1/programs/{}", self.api_base, handle);
        let response = self
            .client
            .send(&HttpRequest::get(parse_url(&url)?).with_auth(auth))
            .await?;

        if response.is_gone() {
            debug!("intigriti: program {} no longer exists", handle);
            return Ok(ProgramData::gone(self.page_for(handle)));
        }

        let detail: ProgramDetail = response.json()?;
        let program = to_program(detail);
        self.remember_page(handle, &program.url);
        Ok(program.apply_options(options))
    }

    fn handle_from_url(&self, url: &str) -> Option<Handle> {
        let pages = self.pages.read().ok()?;
        pages
            .iter()
            .find(|(_, page)| page.as_str() == url)
            .map(|(handle, _)| handle.clone())
    }

    fn note_program_url(&self, handle: &str, url: &str) {
        self.remember_page(handle, url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::canned::CannedServer;

    const LIST: &str = r#"{
        "maxCount": 2,
        "records": [
            {"id": "aaa-1", "handle": "acme", "companyHandle": "acmecorp",
             "confidentialityLevel": {"id": 4, "value": "Public"}, "type": {"id": 1, "value": "Bug bounty"}},
            {"id": "bbb-2", "handle": "globex", "companyHandle": "globex",
             "confidentialityLevel": {"id": 1, "value": "InviteOnly"}, "type": {"id": 2, "value": "Vulnerability disclosure"}}
        ]
    }"#;

    const DETAIL: &str = r#"{
        "id": "aaa-1", "handle": "acme", "companyHandle": "acmecorp",
        "domains": {"content": [
            {"type": {"id": 1, "value": "Url"}, "endpoint": "app.acme.com", "tier": {"id": 2, "value": "Tier 1"}, "description": "Main app"},
            {"type": {"id": 7, "value": "Wildcard"}, "endpoint": "*.acme.com", "tier": {"id": 1, "value": "No Bounty"}, "description": null},
            {"type": {"id": 1, "value": "Url"}, "endpoint": "status.acme.com", "tier": {"id": 5, "value": "Out Of Scope"}}
        ]}
    }"#;

    #[test]
    fn test_list_filters() {
        let list: ProgramList = serde_json::from_str(LIST).unwrap();
        assert_eq!(list.max_count, 2);

        let private_only = PollOptions { private_only: true, ..Default::default() };
        let bounty_only = PollOptions { bounty_only: true, ..Default::default() };
        let ids = |options: &PollOptions| -> Vec<String> {
            list.records.iter().filter(|p| keep_listed(p, options)).map(|p| p.id.clone()).collect()
        };
        assert_eq!(ids(&private_only), vec!["bbb-2"]);
        assert_eq!(ids(&bounty_only), vec!["aaa-1"]);
        assert_eq!(ids(&PollOptions::default()).len(), 2);
    }

    #[test]
    fn test_detail_tiers() {
        let detail: ProgramDetail = serde_json::from_str(DETAIL).unwrap();
        let program = to_program(detail);

        assert_eq!(program.url, "https://app.intigriti.com/researcher/programs/acmecorp/acme/detail");
        assert_eq!(program.in_scope.len(), 2);
        assert!(program.in_scope[0].is_bbp);
        assert!(!program.in_scope[1].is_bbp);
        assert_eq!(program.out_of_scope.len(), 1);
        assert_eq!(program.out_of_scope[0].target, "status.acme.com");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let poller = IntigritiPoller::new(HttpClient::new(Platform::Intigriti, 5, None, &[]).unwrap());
        let err = poller.authenticate(&Credentials::token("")).await.unwrap_err();
        assert!(matches!(err, PollError::Auth { .. }));
    }

    async fn poller_against(responses: &[(u16, &str)]) -> (IntigritiPoller, CannedServer) {
        let mut server = CannedServer::bind().await;
        server.serve(responses.iter().map(|(s, b)| (*s, b.to_string())).collect());
        let client = HttpClient::new(Platform::Intigriti, 5, None, &[]).unwrap();
        let poller = IntigritiPoller::with_api_base(client, server.base());
        *poller.token.write().unwrap() = Some("token".to_string());
        (poller, server)
    }

    #[tokio::test]
    async fn test_gone_program_keeps_its_page_url() {
        let (poller, server) = poller_against(&[(200, LIST), (404, "")]).await;

        let handles = poller.list_program_handles(&PollOptions::default()).await.unwrap();
        assert_eq!(handles, vec!["aaa-1", "bbb-2"]);

        let program = poller.fetch_program_scope("aaa-1", &PollOptions::default()).await.unwrap();
        assert!(program.is_empty());
        assert_eq!(program.url, "https://app.intigriti.com/researcher/programs/acmecorp/acme/detail");
        assert_eq!(poller.handle_from_url(&program.url).as_deref(), Some("aaa-1"));
        assert_eq!(server.hits().len(), 2);
    }

    #[tokio::test]
    async fn test_noted_url_is_used_for_unlisted_program() {
        let (poller, _server) = poller_against(&[(410, "")]).await;
        let page = "https://app.intigriti.com/researcher/programs/initech/tps/detail";
        poller.note_program_url("ccc-3", page);

        let program = poller.fetch_program_scope("ccc-3", &PollOptions::default()).await.unwrap();
        assert_eq!(program.url, page);
        assert_eq!(poller.handle_from_url(page).as_deref(), Some("ccc-3"));
    }

    #[tokio::test]
    async fn test_fetched_program_is_remembered() {
        let (poller, _server) = poller_against(&[(200, DETAIL)]).await;

        let program = poller.fetch_program_scope("aaa-1", &PollOptions::default()).await.unwrap();
        assert_eq!(poller.handle_from_url(&program.url).as_deref(), Some("aaa-1"));
        assert_eq!(poller.handle_from_url("https://app.intigriti.com/researcher/programs/x/y/detail"), None);
    }
}
