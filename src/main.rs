fn main() -> anyhow::Result<()> {
    udfs_daemon_lib::run()
}
