use crate::repo::REPO_VERSION;

pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn system() -> String {
    format!("{}/{}", std::env::consts::ARCH, std::env::consts::OS)
}

pub fn version_lines() -> Vec<String> {
    vec![
        format!("udfs-daemon version: {}", DAEMON_VERSION),
        format!("Repo version: {}", REPO_VERSION),
        format!("System version: {}", system()),
    ]
}

pub fn print_version() {
    for line in version_lines() {
        println!("{}", line);
    }
}
