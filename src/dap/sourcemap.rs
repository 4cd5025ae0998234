use std::collections::HashMap;

/// Path prefix mapping between the debugger host and the client.
///
/// Debuggers often run on another machine (or see a mounted share) and print paths like
/// `F:\SIGER\src\PROG.CBL` that mean nothing to the client.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    /// Mapping from debugger paths to client paths.
    target_to_client: Vec<(String, String)>,
    /// Reverse mapping from client paths to debugger paths.
    client_to_target: Vec<(String, String)>,
}

impl SourceMap {
    /// Key is a debugger path prefix, value is a client path prefix.
    pub fn new(mapping: &HashMap<String, String>) -> Self {
        let mut sm = SourceMap::default();
        for (target_prefix, client_prefix) in mapping {
            sm.target_to_client
                .push((Self::norm_prefix(target_prefix), client_prefix.clone()));
            sm.client_to_target
                .push((Self::norm_prefix(client_prefix), target_prefix.clone()));
        }

        // longest prefix wins
        sm.target_to_client
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        sm.client_to_target
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        sm
    }

    pub fn is_empty(&self) -> bool {
        self.target_to_client.is_empty()
    }

    pub fn map_target_to_client(&self, target_path: &str) -> String {
        Self::apply_map(target_path, &self.target_to_client)
    }

    pub fn map_client_to_target(&self, client_path: &str) -> String {
        Self::apply_map(client_path, &self.client_to_target)
    }

    fn apply_map(path: &str, mapping: &[(String, String)]) -> String {
        let normalized = Self::norm_path(path);
        for (from_norm, to_raw) in mapping {
            if let Some(suffix) = normalized.strip_prefix(from_norm.as_str()) {
                return Self::join_with_style(to_raw, suffix);
            }
        }
        path.to_string()
    }

    fn join_with_style(prefix: &str, suffix_norm: &str) -> String {
        if suffix_norm.is_empty() {
            return prefix.to_string();
        }
        let mut out = prefix.to_string();
        let backslash = out.contains('\\');

        if !out.ends_with('/') && !out.ends_with('\\') {
            out.push(if backslash { '\\' } else { '/' });
        }
        if backslash {
            out.push_str(&suffix_norm.replace('/', "\\"));
        } else {
            out.push_str(suffix_norm);
        }
        out
    }

    fn norm_prefix(s: &str) -> String {
        let mut out = Self::norm_path(s);
        if !out.ends_with('/') {
            out.push('/');
        }
        out
    }

    fn norm_path(s: &str) -> String {
        s.replace('\\', "/")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_map_windows_debugger_paths() {
        let sm = SourceMap::new(&HashMap::from([
            ("F:\\SIGER".to_string(), "/home/dev/siger".to_string()),
            (
                "F:\\SIGER\\20.10a\\src".to_string(),
                "/home/dev/src".to_string(),
            ),
        ]));

        assert_eq!(
            sm.map_target_to_client("F:\\SIGER\\20.10a\\src\\SRIM00.CBL"),
            "/home/dev/src/SRIM00.CBL"
        );
        assert_eq!(
            sm.map_target_to_client("F:/SIGER/copy/SRIM01.CPY"),
            "/home/dev/siger/copy/SRIM01.CPY"
        );
        assert_eq!(
            sm.map_client_to_target("/home/dev/src/SRIM00.CBL"),
            "F:\\SIGER\\20.10a\\src\\SRIM00.CBL"
        );
        assert_eq!(sm.map_target_to_client("SRIM00.CBL"), "SRIM00.CBL");
    }

    #[test]
    fn test_empty_map_is_identity() {
        let sm = SourceMap::default();
        assert!(sm.is_empty());
        assert_eq!(sm.map_target_to_client("C:\\src\\A.CBL"), "C:\\src\\A.CBL");
    }
}
