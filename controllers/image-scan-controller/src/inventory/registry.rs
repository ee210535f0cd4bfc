//! Registry digest lookup.
//!
//! Used when the cluster does not report a digest for a running container:
//! the manifest is looked up with a `HEAD` request against the registry v2 API
//! and the `Docker-Content-Digest` header is returned. Anonymous bearer tokens
//! are fetched on demand for registries that challenge with `WWW-Authenticate`.

use crate::error::RegistryError;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const DEFAULT_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DIGEST_HEADER: &str = "docker-content-digest";

const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

static CHALLENGE_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).ok());

/// Resolves an image reference to its content digest (`sha256:...`)
#[async_trait::async_trait]
pub trait DigestResolver: Send + Sync {
    async fn resolve(&self, image: &str) -> Result<String, RegistryError>;
}

/// A parsed image reference: `[registry/]repository[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// Tag or digest; defaults to `latest`
    pub reference: String,
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl ImageReference {
    /// Split an image reference into registry, repository and tag or digest
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let image = image.trim();
        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (image, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => (first, rest),
            _ => (DEFAULT_REGISTRY, name),
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
            _ => (remainder, None),
        };

        if repository.is_empty() || registry.is_empty() {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        let reference = digest.or(tag).unwrap_or("latest");
        if reference.is_empty() {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository,
            reference: reference.to_string(),
        })
    }

    fn api_base(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            format!("https://{}", DOCKER_HUB_API)
        } else if self.registry.starts_with("localhost") || self.registry.starts_with("127.0.0.1") {
            format!("http://{}", self.registry)
        } else {
            format!("https://{}", self.registry)
        }
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/v2/{}/manifests/{}", self.api_base(), self.repository, self.reference)
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let re = CHALLENGE_PARAM.as_ref()?;
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for caps in re.captures_iter(params) {
            let value = caps[2].to_string();
            match &caps[1] {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Registry v2 API resolver backed by reqwest
pub struct HttpRegistryResolver {
    client: Client,
}

impl HttpRegistryResolver {
    /// Create a resolver whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn head_manifest(&self, url: &str, bearer: Option<&str>) -> Result<Response, RegistryError> {
        let mut request = self.client.head(url).header(ACCEPT, MANIFEST_TYPES);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request.send().await?)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, RegistryError> {
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }

        debug!("Requesting anonymous registry token from {}", challenge.realm);
        let response = self.client.get(&challenge.realm).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Unauthorized(format!(
                "token endpoint {} returned {}",
                challenge.realm,
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| RegistryError::Unauthorized(format!("no token in response from {}", challenge.realm)))
    }
}

#[async_trait::async_trait]
impl DigestResolver for HttpRegistryResolver {
    async fn resolve(&self, image: &str) -> Result<String, RegistryError> {
        let reference = ImageReference::parse(image)?;
        if reference.reference.starts_with("sha256:") {
            return Ok(reference.reference.to_lowercase());
        }

        let url = reference.manifest_url();
        debug!("Resolving digest for {} via {}", image, url);

        let mut response = self.head_manifest(&url, None).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(BearerChallenge::parse)
                .ok_or_else(|| RegistryError::Unauthorized(format!("{} requires credentials", reference.registry)))?;
            let token = self.fetch_token(&challenge).await?;
            response = self.head_manifest(&url, Some(&token)).await?;
        }

        if !response.status().is_success() {
            return Err(RegistryError::Status {
                status: response.status(),
                url,
            });
        }

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_lowercase)
            .ok_or(RegistryError::MissingDigest(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_docker_hub_short_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.reference, "latest");
        assert_eq!(r.manifest_url(), "https://registry-1.docker.io/v2/library/nginx/manifests/latest");
    }

    #[test]
    fn test_parse_registry_with_port_and_tag() {
        let r = ImageReference::parse("registry.example.com:5000/org/app:v1.2").unwrap();
        assert_eq!(r.registry, "registry.example.com:5000");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.reference, "v1.2");
    }

    #[test]
    fn test_parse_digest_wins_over_tag() {
        let r = ImageReference::parse("quay.io/org/app:v1@sha256:abc").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.reference, "sha256:abc");
    }

    #[test]
    fn test_parse_localhost_uses_plain_http() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.manifest_url(), "http://localhost:5000/v2/app/manifests/latest");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("quay.io/").is_err());
    }

    #[test]
    fn test_bearer_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:library/nginx:pull,push"));

        assert!(BearerChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
    }

    #[tokio::test]
    async fn test_digest_reference_resolves_without_network() {
        let resolver = HttpRegistryResolver::new(Duration::from_secs(1)).unwrap();
        let digest = resolver.resolve("quay.io/org/app@sha256:ABC").await.unwrap();
        assert_eq!(digest, "sha256:abc");
    }

    proptest! {
        #[test]
        fn parsed_repository_never_carries_tag_or_digest(
            org in "[a-z][a-z0-9-]{0,10}",
            repo in "[a-z][a-z0-9-]{0,20}",
            tag in "[a-z0-9][a-z0-9.-]{0,10}",
        ) {
            let image = format!("{}/{}:{}", org, repo, tag);
            let r = ImageReference::parse(&image).unwrap();
            prop_assert_eq!(r.registry.as_str(), "docker.io");
            prop_assert_eq!(r.repository, format!("{}/{}", org, repo));
            prop_assert_eq!(r.reference, tag);
        }
    }
}
