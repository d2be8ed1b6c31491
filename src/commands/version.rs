pub fn run() -> anyhow::Result<()> {
    println!("kube-scaler {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
