fn main() -> anyhow::Result<()> {
    taskhive::run()?;
    Ok(())
}
