use std::path::Path;

/// Running server process, killed when dropped.
pub struct Server(std::process::Child);

impl Server {
    pub fn new(
        path: &Path,
        id: usize,
        cluster: &Path,
        verbose: u8,
    ) -> std::io::Result<Self> {
        let id = id.to_string();
        let mut command = std::process::Command::new(path);
        if verbose > 0 {
            let verbosity = "-".to_string() + &"v".repeat(verbose as usize);
            command.arg(&verbosity);
        }
        command.args(&["-i", &id])
            .arg("-c")
            .arg(cluster)
            .spawn()
            .map(Server)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}
