use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use roster_core::config::HttpConfig;
use roster_core::error::AppError;
use roster_core::models::{SchoolRoster, UpstreamSchool};
use roster_core::traits::RosterSource;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::roster::RosterBuilder;

/// One page of a Wonde list endpoint.
///
/// Wonde API reference: <https://docs.wonde.com/docs/api/sync>
///
/// ```json
/// {
///     "data": [ ... ],
///     "meta": { "pagination": { "next": "https://...&page=2", "more": true } }
/// }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct WondePage<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

impl<T> WondePage<T> {
    /// URL of the following page, if any.
    pub fn next_url(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.pagination.as_ref())
            .and_then(|p| p.next.as_deref())
            .filter(|next| !next.is_empty())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PageMeta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WondeSingle<T> {
    data: T,
}

/// An `include=` relation, which Wonde wraps as `{"data": ...}`.
#[derive(Deserialize, Debug, Clone)]
pub struct Included<T> {
    pub data: Option<T>,
}

impl<T> Default for Included<T> {
    fn default() -> Self {
        Self { data: None }
    }
}

impl<T> Included<Vec<T>> {
    pub fn items(&self) -> &[T] {
        self.data.as_deref().unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeSchool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub urn: Option<serde_json::Value>,
    #[serde(default)]
    pub address: Option<WondeAddress>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WondeAddress {
    #[serde(default)]
    pub address_line_1: Option<String>,
    #[serde(default)]
    pub address_line_2: Option<String>,
    #[serde(default)]
    pub address_town: Option<String>,
    #[serde(default)]
    pub address_country: Option<WondeCountry>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeCountry {
    #[serde(default)]
    pub name: Option<String>,
}

impl From<WondeSchool> for UpstreamSchool {
    fn from(school: WondeSchool) -> Self {
        // Wonde returns the URN as a number for some regions and a string for others.
        let urn = school.urn.as_ref().and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
        let address = school.address.unwrap_or_default();
        UpstreamSchool {
            upstream_id: school.id,
            name: school.name,
            urn,
            address1: address.address_line_1,
            address2: address.address_line_2,
            town: address.address_town,
            country: address
                .address_country
                .and_then(|c| c.name)
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeDate {
    pub date: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeYear {
    pub code: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeEmployeeRef {
    pub id: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeClass {
    pub id: String,
    #[serde(default)]
    pub mis_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub employees: Included<Vec<WondeEmployeeRef>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeStudent {
    pub id: String,
    #[serde(default)]
    pub mis_id: Option<String>,
    #[serde(default)]
    pub forename: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<WondeDate>,
    #[serde(default)]
    pub year: Included<WondeYear>,
    #[serde(default)]
    pub classes: Included<Vec<WondeClass>>,
}

impl WondeStudent {
    pub fn year_code(&self) -> Option<&str> {
        self.year.data.as_ref().map(|y| y.code.as_str())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WondeEmails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WondeContactDetails {
    #[serde(default)]
    pub emails: Option<WondeEmails>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WondeEmployee {
    pub id: String,
    #[serde(default)]
    pub mis_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub forename: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub contact_details: Included<WondeContactDetails>,
    #[serde(default)]
    pub classes: Included<Vec<WondeClass>>,
}

impl WondeEmployee {
    pub fn email(&self) -> Option<&str> {
        self.contact_details
            .data
            .as_ref()
            .and_then(|c| c.emails.as_ref())
            .and_then(|e| e.email.as_deref())
            .filter(|email| !email.trim().is_empty())
    }
}

/// Follows `meta.pagination.next` links until they run out.
///
/// A failed page ends pagination; the items gathered so far are returned
/// together with the error. A `next` link that was already visited also
/// ends pagination.
pub async fn collect_pages<T, F, Fut>(first_url: String, mut fetch: F) -> (Vec<T>, Option<AppError>)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<WondePage<T>, AppError>>,
{
    let mut items = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(first_url);

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            warn!("Pagination loop detected at {}, stopping", url);
            break;
        }
        match fetch(url).await {
            Ok(page) => {
                next = page.next_url().map(str::to_string);
                items.extend(page.data);
            }
            Err(e) => return (items, Some(e)),
        }
    }

    (items, None)
}

/// HTTP client for the Wonde school-data API.
///
/// # Examples
///
/// ```no_run
/// use roster_client::WondeClient;
/// use roster_core::{HttpConfig, Region};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = WondeClient::new(Region::Au.default_base_url(), "token", HttpConfig::default())?;
/// let schools = client.schools().await?;
/// println!("Found {} schools", schools.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WondeClient {
    client: Client,
    base_url: Url,
    token: String,
    config: HttpConfig,
}

impl WondeClient {
    /// Creates a client for the schools endpoint at `base_url_str`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is malformed.
    /// Returns `AppError::Config` if the token is empty.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(base_url_str: &str, token: &str, config: HttpConfig) -> Result<Self, AppError> {
        // A trailing slash keeps `join` from replacing the `schools` segment.
        let normalized = format!("{}/", base_url_str.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|_| AppError::InvalidUrl(format!("Invalid Wonde URL: {}", base_url_str)))?;

        if token.trim().is_empty() {
            return Err(AppError::Config("Wonde API token is empty".to_string()));
        }

        let client = Client::builder()
            .user_agent("roster-sync/0.1")
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::InvalidUrl(e.to_string()))
    }

    fn schools_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("per_page", &self.config.page_size.to_string());
        url
    }

    fn students_url(&self, school_id: &str) -> Result<Url, AppError> {
        let mut url = self.endpoint(&format!("{}/students", school_id))?;
        url.query_pairs_mut()
            .append_pair("include", "classes.employees,year")
            .append_pair("per_page", &self.config.page_size.to_string());
        Ok(url)
    }

    fn employees_url(&self, school_id: &str) -> Result<Url, AppError> {
        let mut url = self.endpoint(&format!("{}/employees", school_id))?;
        url.query_pairs_mut()
            .append_pair("has_class", "true")
            .append_pair("include", "contact_details,classes")
            .append_pair("per_page", &self.config.page_size.to_string());
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let url = Url::parse(url).map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        let resp = self.request_with_retry(&url).await?;
        resp.json()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))
    }

    async fn get_page<T: DeserializeOwned>(&self, url: String) -> Result<WondePage<T>, AppError> {
        debug!("GET {}", url);
        self.get_json(&url).await
    }

    /// Lists every school the token can access.
    ///
    /// # Errors
    ///
    /// Any page failure is returned; a partial school list is discarded.
    pub async fn schools(&self) -> Result<Vec<UpstreamSchool>, AppError> {
        let (schools, error) = collect_pages(self.schools_url().to_string(), move |url| {
            self.get_page::<WondeSchool>(url)
        })
        .await;

        if let Some(e) = error {
            return Err(e);
        }
        Ok(schools.into_iter().map(UpstreamSchool::from).collect())
    }

    /// Fetches a single school by upstream id.
    pub async fn school(&self, school_id: &str) -> Result<UpstreamSchool, AppError> {
        let url = self.endpoint(school_id)?;
        let single: WondeSingle<WondeSchool> = self.get_json(url.as_str()).await?;
        Ok(single.data.into())
    }

    /// Fetches students and employees of a school and filters them into a roster.
    ///
    /// Never fails: page errors end the affected listing early and are
    /// recorded in [`SchoolRoster::fetch_errors`].
    pub async fn roster(&self, school_id: &str) -> SchoolRoster {
        let mut builder = RosterBuilder::new();

        match self.students_url(school_id) {
            Ok(url) => {
                let (students, error) = collect_pages(url.to_string(), move |url| {
                    self.get_page::<WondeStudent>(url)
                })
                .await;
                info!("Fetched {} students for school {}", students.len(), school_id);
                for student in students {
                    builder.add_student(student);
                }
                if let Some(e) = error {
                    warn!("Student listing for {} ended early: {}", school_id, e);
                    builder.record_error(format!("students: {}", e));
                }
            }
            Err(e) => builder.record_error(format!("students: {}", e)),
        }

        match self.employees_url(school_id) {
            Ok(url) => {
                let (employees, error) = collect_pages(url.to_string(), move |url| {
                    self.get_page::<WondeEmployee>(url)
                })
                .await;
                info!("Fetched {} employees for school {}", employees.len(), school_id);
                for employee in employees {
                    builder.add_employee(employee);
                }
                if let Some(e) = error {
                    warn!("Employee listing for {} ended early: {}", school_id, e);
                    builder.record_error(format!("employees: {}", e));
                }
            }
            Err(e) => builder.record_error(format!("employees: {}", e)),
        }

        let roster = builder.build();
        info!(
            "Roster for {}: {} students, {} teachers, {} classrooms",
            school_id,
            roster.students.len(),
            roster.teachers.len(),
            roster.classrooms.len()
        );
        roster
    }

    /// Makes an authenticated GET request with automatic retry on transient failures.
    ///
    /// Retries on:
    /// - Rate limiting (429), with exponential backoff
    /// - Server errors (5xx), connection failures and timeouts, with linear backoff
    ///
    /// Other 4xx responses and other transport errors fail immediately.
    async fn request_with_retry(&self, url: &Url) -> Result<reqwest::Response, AppError> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self
                .client
                .get(url.clone())
                .bearer_auth(&self.token)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        AppError::RateLimitExceeded
                    } else if status.is_server_error() {
                        AppError::ClientError(format!("Server error: HTTP {}", status.as_u16()))
                    } else {
                        return Err(AppError::ClientError(format!(
                            "HTTP {} from {}",
                            status.as_u16(),
                            url
                        )));
                    }
                }
                Err(e) if e.is_timeout() => AppError::Timeout(self.config.timeout.as_secs()),
                Err(e) if e.is_connect() => {
                    AppError::NetworkError(format!("Connection failed: {}", e))
                }
                Err(e) => return Err(AppError::ClientError(e.to_string())),
            };

            if attempt >= max_retries {
                return Err(error);
            }
            match retry_delay(&error, attempt, self.config.retry_base_delay) {
                Some(delay) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt, max_retries, url, error, delay
                    );
                    sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }
}

/// Backoff before the next attempt, or `None` if `error` is not worth retrying.
///
/// Rate limits back off exponentially; everything else linearly.
fn retry_delay(error: &AppError, attempt: u32, base: Duration) -> Option<Duration> {
    if !error.is_retryable() {
        return None;
    }
    Some(match error {
        AppError::RateLimitExceeded => base * 2_u32.pow(attempt),
        _ => base * attempt,
    })
}

#[async_trait]
impl RosterSource for WondeClient {
    async fn list_schools(&self) -> Result<Vec<UpstreamSchool>, AppError> {
        self.schools().await
    }

    async fn fetch_school(&self, upstream_id: &str) -> Result<UpstreamSchool, AppError> {
        self.school(upstream_id).await
    }

    async fn fetch_school_roster(&self, upstream_id: &str) -> SchoolRoster {
        self.roster(upstream_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn client() -> WondeClient {
        WondeClient::new(
            "https://api-ap-southeast-2.wonde.com/v1.0/schools",
            "secret",
            HttpConfig::default(),
        )
        .unwrap()
    }

    fn page(ids: &[&str], next: Option<&str>) -> WondePage<WondeEmployeeRef> {
        WondePage {
            data: ids
                .iter()
                .map(|id| WondeEmployeeRef { id: id.to_string() })
                .collect(),
            meta: Some(PageMeta {
                pagination: Some(Pagination {
                    next: next.map(str::to_string),
                }),
            }),
        }
    }

    #[test]
    fn test_new_with_valid_url() {
        let client = client();
        assert_eq!(
            client.base_url().as_str(),
            "https://api-ap-southeast-2.wonde.com/v1.0/schools/"
        );
    }

    #[test]
    fn test_new_with_invalid_url() {
        let result = WondeClient::new("not-a-valid-url", "secret", HttpConfig::default());
        match result {
            Err(AppError::InvalidUrl(msg)) => assert!(msg.contains("Invalid Wonde URL")),
            _ => panic!("Expected AppError::InvalidUrl"),
        }
    }

    #[test]
    fn test_new_with_empty_token() {
        let result = WondeClient::new("https://api.wonde.com/v1.0/schools", " ", HttpConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_endpoint_urls() {
        let client = client();
        assert_eq!(
            client.students_url("A5960542").unwrap().as_str(),
            "https://api-ap-southeast-2.wonde.com/v1.0/schools/A5960542/students?include=classes.employees%2Cyear&per_page=200"
        );
        assert_eq!(
            client.employees_url("A5960542").unwrap().as_str(),
            "https://api-ap-southeast-2.wonde.com/v1.0/schools/A5960542/employees?has_class=true&include=contact_details%2Cclasses&per_page=200"
        );
        assert_eq!(
            client.schools_url().as_str(),
            "https://api-ap-southeast-2.wonde.com/v1.0/schools/?per_page=200"
        );
    }

    #[test]
    fn test_school_deserialization() {
        let json = r#"{
            "data": {
                "id": "A5960542",
                "name": "Wonde ANZ Testing School",
                "urn": 999939,
                "address": {
                    "address_line_1": "1 George St",
                    "address_line_2": null,
                    "address_town": "Sydney",
                    "address_country": { "name": "Australia" }
                }
            }
        }"#;
        let single: WondeSingle<WondeSchool> = serde_json::from_str(json).unwrap();
        let school = UpstreamSchool::from(single.data);
        assert_eq!(school.upstream_id, "A5960542");
        assert_eq!(school.urn, Some(999939));
        assert_eq!(school.address1.as_deref(), Some("1 George St"));
        assert!(school.address2.is_none());
        assert_eq!(school.country, "Australia");
    }

    #[test]
    fn test_school_string_urn_and_missing_address() {
        let json = r#"{ "id": "X1", "name": "Small School", "urn": "123" }"#;
        let school = UpstreamSchool::from(serde_json::from_str::<WondeSchool>(json).unwrap());
        assert_eq!(school.urn, Some(123));
        assert_eq!(school.country, "");
        assert!(school.town.is_none());
    }

    #[test]
    fn test_student_page_deserialization() {
        let json = r#"{
            "data": [{
                "id": "B712005510",
                "mis_id": "11186",
                "forename": "Rhyett",
                "surname": "Burrell",
                "gender": "MALE",
                "date_of_birth": { "date": "2015-07-20 00:00:00.000000", "timezone": "UTC" },
                "year": { "data": { "id": "Y1", "code": "1" } },
                "classes": { "data": [{
                    "id": "B925278943",
                    "mis_id": "fa83",
                    "name": "Maths 01",
                    "employees": { "data": [{ "id": "B417678060" }] }
                }] }
            }],
            "meta": { "pagination": { "next": null, "more": false } }
        }"#;
        let page: WondePage<WondeStudent> = serde_json::from_str(json).unwrap();
        assert!(page.next_url().is_none());
        let student = &page.data[0];
        assert_eq!(student.year_code(), Some("1"));
        assert_eq!(student.classes.items().len(), 1);
        assert_eq!(student.classes.items()[0].employees.items()[0].id, "B417678060");
    }

    #[test]
    fn test_student_without_year_include() {
        let json = r#"{
            "id": "B1",
            "forename": "No",
            "surname": "Year",
            "classes": { "data": [] }
        }"#;
        let student: WondeStudent = serde_json::from_str(json).unwrap();
        assert!(student.year_code().is_none());

        let json = r#"{ "id": "B2", "year": { "data": null } }"#;
        let student: WondeStudent = serde_json::from_str(json).unwrap();
        assert!(student.year_code().is_none());
        assert!(student.classes.items().is_empty());
    }

    #[test]
    fn test_retry_delay() {
        let base = Duration::from_millis(500);
        assert_eq!(
            retry_delay(&AppError::RateLimitExceeded, 1, base),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            retry_delay(&AppError::Timeout(30), 2, base),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            retry_delay(&AppError::ClientError("Server error: HTTP 503".to_string()), 1, base),
            Some(base)
        );
        assert_eq!(retry_delay(&AppError::InvalidUrl("x".to_string()), 1, base), None);
    }

    #[test]
    fn test_employee_without_contact_details() {
        let json = r#"{
            "id": "B417678060",
            "forename": "Lab60",
            "surname": "Sixty",
            "contact_details": { "data": null },
            "classes": { "data": [] }
        }"#;
        let employee: WondeEmployee = serde_json::from_str(json).unwrap();
        assert!(employee.email().is_none());
        assert!(employee.classes.items().is_empty());
    }

    #[tokio::test]
    async fn test_collect_pages_follows_next_links() {
        let pages: HashMap<String, WondePage<WondeEmployeeRef>> = HashMap::from([
            ("p1".to_string(), page(&["a", "b"], Some("p2"))),
            ("p2".to_string(), page(&["c"], Some("p3"))),
            ("p3".to_string(), page(&["d"], None)),
        ]);
        let requested = Arc::new(Mutex::new(Vec::new()));

        let (items, error) = collect_pages("p1".to_string(), |url| {
            let pages = pages.clone();
            let requested = requested.clone();
            async move {
                requested.lock().unwrap().push(url.clone());
                pages
                    .get(&url)
                    .cloned()
                    .ok_or_else(|| AppError::ClientError("unknown page".to_string()))
            }
        })
        .await;

        assert!(error.is_none());
        let ids: Vec<_> = items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(*requested.lock().unwrap(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_collect_pages_keeps_partial_results_on_error() {
        let pages: HashMap<String, WondePage<WondeEmployeeRef>> =
            HashMap::from([("p1".to_string(), page(&["a"], Some("p2")))]);

        let (items, error) = collect_pages("p1".to_string(), |url| {
            let pages = pages.clone();
            async move {
                pages
                    .get(&url)
                    .cloned()
                    .ok_or(AppError::ClientError("HTTP 503".to_string()))
            }
        })
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(error, Some(AppError::ClientError(_))));
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_repeated_link() {
        let pages: HashMap<String, WondePage<WondeEmployeeRef>> =
            HashMap::from([("p1".to_string(), page(&["a"], Some("p1")))]);

        let (items, error) = collect_pages("p1".to_string(), |url| {
            let pages = pages.clone();
            async move { pages.get(&url).cloned().ok_or(AppError::RateLimitExceeded) }
        })
        .await;

        assert_eq!(items.len(), 1);
        assert!(error.is_none());
    }
}
