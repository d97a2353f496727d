//! Session URL construction.

use url::Url;

use crate::error::{Result, SessionError};

/// Control channel protocol version requested by this agent.
pub const PROTOCOL_VERSION: u32 = 2;

/// Identity and per-attempt state the URL encodes.
pub struct UrlParams<'a> {
    pub cluster: &'a str,
    pub container_instance_arn: &'a str,
    pub agent_version: &'a str,
    pub agent_hash: &'a str,
    /// Container runtime version as reported by the task engine; omitted
    /// from the URL when the engine cannot report one.
    pub docker_version: Option<&'a str>,
    pub send_credentials: bool,
    pub seq_num: i64,
}

/// Build the session URL for one connection attempt.
///
/// The path is `/ws`; query parameters are appended in canonical sorted
/// order. The endpoint's `http`/`https` scheme is kept as-is; the
/// transport maps it to `ws`/`wss` at connect time.
pub fn session_url(endpoint: &str, params: &UrlParams<'_>) -> Result<String> {
    let mut url = Url::parse(endpoint)
        .map_err(|error| SessionError::Discovery(format!("bad endpoint {}: {}", endpoint, error)))?;
    url.set_path("/ws");
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("agentHash", params.agent_hash);
        query.append_pair("agentVersion", params.agent_version);
        query.append_pair("clusterArn", params.cluster);
        query.append_pair("containerInstanceArn", params.container_instance_arn);
        if let Some(docker_version) = params.docker_version {
            query.append_pair("dockerVersion", &format!("DockerVersion: {}", docker_version));
        }
        query.append_pair("protocolVersion", &PROTOCOL_VERSION.to_string());
        query.append_pair(
            "sendCredentials",
            if params.send_credentials { "true" } else { "false" },
        );
        query.append_pair("seqNum", &params.seq_num.to_string());
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn params<'a>() -> UrlParams<'a> {
        UrlParams {
            cluster: "someCluster",
            container_instance_arn: "myContainerInstance",
            agent_version: "1.0.0",
            agent_hash: "deadbeef",
            docker_version: Some("Docker version result"),
            send_credentials: true,
            seq_num: 1,
        }
    }

    fn query_map(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_url_shape() {
        let wsurl = session_url("http://endpoint.tld", &params()).unwrap();
        let parsed = Url::parse(&wsurl).unwrap();
        assert_eq!(parsed.path(), "/ws");

        let query = query_map(&wsurl);
        assert_eq!(query["clusterArn"], "someCluster");
        assert_eq!(query["containerInstanceArn"], "myContainerInstance");
        assert_eq!(query["agentVersion"], "1.0.0");
        assert_eq!(query["agentHash"], "deadbeef");
        assert_eq!(query["dockerVersion"], "DockerVersion: Docker version result");
        assert_eq!(query["sendCredentials"], "true");
        assert_eq!(query["seqNum"], "1");
        let protocol_version: u32 = query["protocolVersion"].parse().unwrap();
        assert!(protocol_version > 1);
    }

    #[test]
    fn test_query_parameters_in_sorted_order() {
        let wsurl = session_url("http://endpoint.tld", &params()).unwrap();
        assert_eq!(
            wsurl,
            format!(
                "http://endpoint.tld/ws?agentHash=deadbeef&agentVersion=1.0.0&\
                 clusterArn=someCluster&containerInstanceArn=myContainerInstance&\
                 dockerVersion=DockerVersion%3A+Docker+version+result&\
                 protocolVersion={}&sendCredentials=true&seqNum=1",
                PROTOCOL_VERSION
            )
        );
    }

    #[test]
    fn test_send_credentials_false_and_live_seq_num() {
        let mut p = params();
        p.send_credentials = false;
        p.seq_num = 10;
        let wsurl = session_url("http://endpoint.tld", &p).unwrap();
        let query = query_map(&wsurl);
        assert_eq!(query["sendCredentials"], "false");
        assert_eq!(query["seqNum"], "10");
    }

    #[test]
    fn test_docker_version_omitted_when_engine_cannot_report() {
        let mut p = params();
        p.docker_version = None;
        let wsurl = session_url("http://endpoint.tld", &p).unwrap();
        assert!(!query_map(&wsurl).contains_key("dockerVersion"));
    }

    #[test]
    fn test_https_scheme_is_preserved() {
        let wsurl = session_url("https://endpoint.tld", &params()).unwrap();
        assert!(wsurl.starts_with("https://"));
    }

    #[test]
    fn test_bad_endpoint_is_a_discovery_error() {
        assert!(session_url("not a url", &params()).is_err());
    }
}
