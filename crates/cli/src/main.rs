fn main() -> anyhow::Result<()> {
    filewatchd_cli::run()
}
