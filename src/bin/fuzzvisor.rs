use anyhow::Result;

fn main() -> Result<()> {
    fuzzvisor::cli::run()
}
