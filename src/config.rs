use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::cli::UpstreamArgs;
use crate::fetch::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, FetchOptions};
use crate::urlnorm;

pub const DEFAULT_ORIGIN: &str = "https://komiku.id/";
pub const DEFAULT_LISTING_PATH: &str = "/daftar-komik/";
const MAX_REDIRECT_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Site root every item, chapter and listing URL is built from.
    pub origin: Url,
    pub listing_path: String,
    /// Budget for one fetch including its redirects.
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    /// LRU bound on the mapping store; `None` keeps every mapping.
    pub store_capacity: Option<NonZeroUsize>,
    /// Hosts a client supplied origin hint may point at. `None` allows the
    /// origin's own domain and its subdomains.
    pub hint_hosts: Option<Vec<String>>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid url"),
            listing_path: DEFAULT_LISTING_PATH.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            store_capacity: None,
            hint_hosts: None,
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, which stands in for the process
    /// environment. Unset or blank variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = var("KOMIKU_PROXY_ORIGIN") {
            config.origin = parse_origin(&raw)
                .with_context(|| format!("invalid KOMIKU_PROXY_ORIGIN={raw:?}"))?;
        }
        if let Some(raw) = var("KOMIKU_PROXY_LISTING_PATH") {
            config.listing_path = raw;
        }
        if let Some(secs) = parse_var::<u64>(&var, "KOMIKU_PROXY_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_var::<usize>(&var, "KOMIKU_PROXY_MAX_REDIRECTS")? {
            config.max_redirects = limit;
        }
        if let Some(raw) = var("KOMIKU_PROXY_USER_AGENT") {
            config.user_agent = raw;
        }
        if let Some(capacity) = parse_var::<usize>(&var, "KOMIKU_PROXY_STORE_CAPACITY")? {
            config.store_capacity = NonZeroUsize::new(capacity);
        }
        if let Some(raw) = var("KOMIKU_PROXY_HINT_HOSTS") {
            let hosts = raw
                .split(',')
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect::<Vec<_>>();
            if !hosts.is_empty() {
                config.hint_hosts = Some(hosts);
            }
        }

        Ok(config)
    }

    /// Command-line flags win over the environment.
    pub fn apply_overrides(&mut self, args: &UpstreamArgs) -> anyhow::Result<()> {
        if let Some(raw) = &args.origin {
            self.origin = parse_origin(raw).with_context(|| format!("invalid --origin {raw:?}"))?;
        }
        if let Some(secs) = args.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = args.max_redirects {
            self.max_redirects = limit;
        }
        if let Some(capacity) = args.store_capacity {
            self.store_capacity = NonZeroUsize::new(capacity);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host_str().is_none() {
            anyhow::bail!("origin must be an http(s) URL with a host: {}", self.origin);
        }
        if self.timeout < Duration::from_secs(1) {
            anyhow::bail!("timeout must be at least 1 second");
        }
        if self.max_redirects > MAX_REDIRECT_LIMIT {
            anyhow::bail!(
                "max_redirects must be at most {MAX_REDIRECT_LIMIT}, got {}",
                self.max_redirects
            );
        }
        if !self.listing_path.starts_with('/') {
            anyhow::bail!("listing path must start with '/': {:?}", self.listing_path);
        }
        Ok(())
    }

    /// Listing page under the origin, keeping any base path the origin has.
    pub fn listing_url(&self) -> anyhow::Result<Url> {
        let relative = format!("./{}", self.listing_path.trim_start_matches('/'));
        self.origin
            .join(&relative)
            .with_context(|| format!("join listing path {:?}", self.listing_path))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.timeout,
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn allowed_hint_hosts(&self) -> Vec<String> {
        if let Some(hosts) = &self.hint_hosts {
            return hosts.clone();
        }
        self.origin
            .host_str()
            .map(|host| vec![urlnorm::strip_www(host).to_ascii_lowercase()])
            .unwrap_or_default()
    }
}

fn parse_origin(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw).context("parse url")?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid {name}={raw:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ProxyConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.origin.as_str(), "https://komiku.id/");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_redirects, 5);
        assert!(config.store_capacity.is_none());
        assert_eq!(
            config.listing_url().unwrap().as_str(),
            "https://komiku.id/daftar-komik/"
        );
        assert_eq!(config.allowed_hint_hosts(), vec!["komiku.id"]);
        config.validate().unwrap();
    }

    #[test]
    fn environment_values_are_applied() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("KOMIKU_PROXY_ORIGIN", "http://127.0.0.1:9000"),
            ("KOMIKU_PROXY_TIMEOUT_SECS", "3"),
            ("KOMIKU_PROXY_MAX_REDIRECTS", "2"),
            ("KOMIKU_PROXY_STORE_CAPACITY", "128"),
            ("KOMIKU_PROXY_HINT_HOSTS", " Img.Example , cdn.example ,"),
        ]))
        .unwrap();
        assert_eq!(config.origin.as_str(), "http://127.0.0.1:9000/");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_redirects, 2);
        assert_eq!(config.store_capacity.map(NonZeroUsize::get), Some(128));
        assert_eq!(config.allowed_hint_hosts(), vec!["img.example", "cdn.example"]);
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let config =
            ProxyConfig::from_lookup(lookup(&[("KOMIKU_PROXY_STORE_CAPACITY", "0")])).unwrap();
        assert!(config.store_capacity.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ProxyConfig::from_lookup(lookup(&[("KOMIKU_PROXY_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("KOMIKU_PROXY_TIMEOUT_SECS"));
    }

    #[test]
    fn flags_override_environment() {
        let mut config =
            ProxyConfig::from_lookup(lookup(&[("KOMIKU_PROXY_MAX_REDIRECTS", "2")])).unwrap();
        config
            .apply_overrides(&UpstreamArgs {
                origin: Some("https://mirror.example/base".to_owned()),
                timeout_secs: None,
                max_redirects: Some(7),
                store_capacity: None,
            })
            .unwrap();
        assert_eq!(config.max_redirects, 7);
        assert_eq!(config.origin.as_str(), "https://mirror.example/base/");
    }

    #[test]
    fn listing_url_keeps_origin_base_path() {
        let config = ProxyConfig::from_lookup(lookup(&[(
            "KOMIKU_PROXY_ORIGIN",
            "https://mirror.example/base",
        )]))
        .unwrap();
        assert_eq!(
            config.listing_url().unwrap().as_str(),
            "https://mirror.example/base/daftar-komik/"
        );
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = ProxyConfig::default();
        config.max_redirects = 21;
        assert!(config.validate().is_err());

        let mut config = ProxyConfig::default();
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ProxyConfig::default();
        config.listing_path = "daftar-komik/".to_owned();
        assert!(config.validate().is_err());

        let mut config = ProxyConfig::default();
        config.origin = Url::parse("ftp://komiku.id/").unwrap();
        assert!(config.validate().is_err());
    }
}
