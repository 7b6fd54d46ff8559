use anyhow::Result;

fn main() -> Result<()> {
    blockflood::cli::execute()
}
