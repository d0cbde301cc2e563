pub fn main() -> flagkit::Result<()> {
    // Configure env_logger to see Flagkit SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("flagkit")).init();

    let sdk_key = std::env::var("FLAGKIT_SDK_KEY")
        .expect("FLAGKIT_SDK_KEY env variable should contain the SDK key");
    let client = flagkit::ClientConfig::from_sdk_key(sdk_key).to_client()?;

    // A configuration updater would normally feed the store; with an empty store every
    // evaluation serves its default value and is still reported to the events service.
    let user = flagkit::User::new("test-user").with_email("test@example.com");
    let enabled = client.bool_variation(&user, "a-boolean-flag", false);

    println!("Flag value: {:?}", enabled);

    // Deliver buffered analytics events before exiting.
    client.close();

    Ok(())
}
