use callguard_license::LicenseError;

#[test]
fn error_display_invalid_key_format() {
    let err = LicenseError::InvalidKeyFormat("bad format".into());
    assert!(format!("{err}").contains("invalid license key format"));
}

#[test]
fn error_display_invalid_fingerprint() {
    let err = LicenseError::InvalidFingerprint("too short".into());
    let msg = format!("{err}");
    assert!(msg.contains("hardware fingerprint"));
    assert!(msg.contains("too short"));
}
