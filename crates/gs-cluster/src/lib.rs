//! Deterministic ownership mapping over the configured cluster of game server
//! (GS) worker processes. See spec §4.1.
//!
//! Mapping is pure once constructed: `owner`/`is_local` never mutate state and
//! never fail, so callers may call them from any hot path without additional
//! error handling.

use std::collections::HashMap;

use gs_tsid::Tsid;

/// Network location of one GS: a client-facing port (`net.gameServers`) and
/// an inter-GS RPC port (`net.rpc.basePort` + worker index).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GsConf {
    pub host: String,
    pub port: u16,
    pub rpc_port: u16,
}

impl GsConf {
    /// The address clients connect (or reconnect) to.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The address peer GS processes dial for inter-GS RPC.
    pub fn rpc_host_port(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

/// One physical host's configured port range, as read from
/// `net.gameServers[host].{host,ports[]}` (spec §6).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostPorts {
    pub host: String,
    pub ports: Vec<u16>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("gs ids {0:?} and {1:?} hash to the same bucket; rename one")]
    HashCollision(String, String),
    #[error("cluster has no configured gs id {0:?}")]
    UnknownLocalGs(String),
    #[error("GSID environment variable is required to resolve a worker gs id and was not set")]
    MissingGsidEnv,
    #[error("cluster configuration is empty")]
    Empty,
}

/// Expand per-host port ranges into one [`GsConf`] per `<host>-<NN>` id, the
/// convention spec §4.1 uses for worker GS ids. RPC ports are assigned
/// sequentially from `rpc_base_port` in the same deterministic (host, index)
/// order the ids are derived in, keeping them distinct from the
/// client-facing ports client code never needs to know in advance.
pub fn expand_game_servers(hosts: &HashMap<String, HostPorts>, rpc_base_port: u16) -> HashMap<String, GsConf> {
    let mut ids: Vec<&String> = hosts.keys().collect();
    ids.sort();

    let mut out = HashMap::new();
    let mut next_rpc_port = rpc_base_port;
    for host_key in ids {
        let hp = &hosts[host_key];
        for (i, port) in hp.ports.iter().enumerate() {
            out.insert(
                format!("{}-{:02}", hp.host, i),
                GsConf { host: hp.host.clone(), port: *port, rpc_port: next_rpc_port },
            );
            next_rpc_port += 1;
        }
    }
    out
}

/// Resolve which of the expanded GS ids this process is.
///
/// The master is configured directly by id; workers derive their id from
/// `<host>-<NN>` and must have it confirmed via the `GSID` environment
/// variable (spec §4.1, §6).
pub fn resolve_local_gs_id(
    expanded: &HashMap<String, GsConf>,
    master_id: Option<&str>,
    gsid_env: Option<&str>,
) -> Result<String, ClusterError> {
    if let Some(master_id) = master_id {
        return if expanded.contains_key(master_id) {
            Ok(master_id.to_string())
        } else {
            Err(ClusterError::UnknownLocalGs(master_id.to_string()))
        };
    }
    let gsid = gsid_env.ok_or(ClusterError::MissingGsidEnv)?;
    if expanded.contains_key(gsid) {
        Ok(gsid.to_string())
    } else {
        Err(ClusterError::UnknownLocalGs(gsid.to_string()))
    }
}

/// The cluster's deterministic ownership map, fixed at process startup.
pub struct ClusterMap {
    /// Lexicographically sorted GS ids; index `hash(tsid) % len` is the
    /// bucket assignment used by [`ClusterMap::owner`].
    sorted_ids: Vec<String>,
    confs: HashMap<String, GsConf>,
    local_id: String,
}

impl ClusterMap {
    /// Build the map, verifying the GS-id list hashes collision-free and that
    /// `local_id` is actually a member of the cluster.
    pub fn new(confs: HashMap<String, GsConf>, local_id: String) -> Result<ClusterMap, ClusterError> {
        if confs.is_empty() {
            return Err(ClusterError::Empty);
        }
        let mut sorted_ids: Vec<String> = confs.keys().cloned().collect();
        sorted_ids.sort();

        let n = sorted_ids.len() as u64;
        let mut buckets: HashMap<u64, &str> = HashMap::with_capacity(sorted_ids.len());
        for id in &sorted_ids {
            let bucket = xxhash_rust::xxh3::xxh3_64(id.as_bytes()) % n;
            if let Some(prev) = buckets.insert(bucket, id.as_str()) {
                return Err(ClusterError::HashCollision(prev.to_string(), id.clone()));
            }
        }

        if !confs.contains_key(&local_id) {
            return Err(ClusterError::UnknownLocalGs(local_id));
        }

        tracing::info!(gs_count = sorted_ids.len(), local_id = %local_id, "cluster map initialized");

        Ok(ClusterMap { sorted_ids, confs, local_id })
    }

    /// This process's own GS id.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// The GS id that owns `tsid`.
    pub fn owner(&self, tsid: &Tsid) -> &str {
        let n = self.sorted_ids.len() as u64;
        let bucket = xxhash_rust::xxh3::xxh3_64(tsid.as_bytes()) % n;
        &self.sorted_ids[bucket as usize]
    }

    /// Whether `tsid` is owned by this process.
    pub fn is_local(&self, tsid: &Tsid) -> bool {
        self.owner(tsid) == self.local_id
    }

    pub fn gs_conf(&self, gsid: &str) -> Option<&GsConf> {
        self.confs.get(gsid)
    }

    pub fn for_each_gs(&self, mut f: impl FnMut(&str, &GsConf)) {
        for id in &self.sorted_ids {
            f(id, &self.confs[id]);
        }
    }

    /// Iterate GS ids that share this process's host — relevant when several
    /// worker GS run side by side on one machine.
    pub fn for_each_local_gs(&self, mut f: impl FnMut(&str, &GsConf)) {
        let local_host = &self.confs[&self.local_id].host;
        for id in &self.sorted_ids {
            let conf = &self.confs[id];
            if &conf.host == local_host {
                f(id, conf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confs(ids: &[&str]) -> HashMap<String, GsConf> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), GsConf { host: "h".into(), port: 8000 + i as u16, rpc_port: 9000 + i as u16 }))
            .collect()
    }

    #[test]
    fn owner_is_deterministic_and_stable_across_instances() {
        let ids = ["gs-00", "gs-01", "gs-02", "gs-03"];
        let a = ClusterMap::new(confs(&ids), "gs-00".into()).unwrap();
        let b = ClusterMap::new(confs(&ids), "gs-01".into()).unwrap();

        let tsid = Tsid::parse("Labc123").unwrap();
        assert_eq!(a.owner(&tsid), b.owner(&tsid));
    }

    #[test]
    fn is_local_matches_owner() {
        let ids = ["gs-00", "gs-01"];
        let map = ClusterMap::new(confs(&ids), "gs-00".into()).unwrap();
        let tsid = Tsid::parse("Labc123").unwrap();
        assert_eq!(map.is_local(&tsid), map.owner(&tsid) == "gs-00");
    }

    #[test]
    fn rejects_unknown_local_id() {
        let ids = ["gs-00", "gs-01"];
        let err = ClusterMap::new(confs(&ids), "gs-99".into()).unwrap_err();
        assert_eq!(err, ClusterError::UnknownLocalGs("gs-99".into()));
    }

    #[test]
    fn expand_game_servers_derives_host_nn_ids() {
        let mut hosts = HashMap::new();
        hosts.insert(
            "box1".to_string(),
            HostPorts { host: "box1".to_string(), ports: vec![8001, 8002] },
        );
        let expanded = expand_game_servers(&hosts, 9000);
        assert!(expanded.contains_key("box1-00"));
        assert!(expanded.contains_key("box1-01"));
        assert_eq!(expanded["box1-00"].port, 8001);
        assert_eq!(expanded["box1-00"].rpc_port, 9000);
        assert_eq!(expanded["box1-01"].rpc_port, 9001);
    }

    #[test]
    fn resolve_worker_id_requires_gsid_env_match() {
        let mut hosts = HashMap::new();
        hosts.insert(
            "box1".to_string(),
            HostPorts { host: "box1".to_string(), ports: vec![8001] },
        );
        let expanded = expand_game_servers(&hosts, 9000);

        assert_eq!(
            resolve_local_gs_id(&expanded, None, Some("box1-00")).unwrap(),
            "box1-00"
        );
        assert_eq!(
            resolve_local_gs_id(&expanded, None, None).unwrap_err(),
            ClusterError::MissingGsidEnv
        );
        assert_eq!(
            resolve_local_gs_id(&expanded, None, Some("nope")).unwrap_err(),
            ClusterError::UnknownLocalGs("nope".into())
        );
    }
}
