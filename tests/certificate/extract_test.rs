//! Certificate extraction from package archives.

use std::io::Write;
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

use romkit::certificate::{
    extract_certificate, CertificateError, SignatureParser, SIGNATURE_BLOCK_ENTRY,
};

/// Parser double: the signature-block bytes ARE the certificate text.
struct EchoParser;

impl SignatureParser for EchoParser {
    fn leading_certificate(&self, block: &[u8]) -> Result<Vec<u8>, CertificateError> {
        Ok(block.to_vec())
    }
}

fn write_package(path: &Path, signature_block: Option<&[u8]>) {
    let file = std::fs::File::create(path).expect("create package");
    let mut writer = ZipWriter::new(file);
    writer
        .start_file("classes.dex", FileOptions::default())
        .expect("start entry");
    writer.write_all(b"dex").expect("write entry");
    if let Some(block) = signature_block {
        writer
            .start_file(SIGNATURE_BLOCK_ENTRY, FileOptions::default())
            .expect("start entry");
        writer.write_all(block).expect("write entry");
    }
    writer.finish().expect("finish package");
}

#[test]
fn returns_the_parsed_signature_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = dir.path().join("app.apk");
    write_package(&package, Some(b"certificate bytes"));

    let cert = extract_certificate(&package, &EchoParser).expect("extract");
    assert_eq!(cert.as_deref(), Some(&b"certificate bytes"[..]));
}

#[test]
fn archive_without_signature_block_yields_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = dir.path().join("app.apk");
    write_package(&package, None);

    let cert = extract_certificate(&package, &EchoParser).expect("extract");
    assert!(cert.is_none());
}

#[test]
fn extraction_never_mutates_the_archive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = dir.path().join("app.apk");
    write_package(&package, Some(b"certificate bytes"));
    let before = std::fs::read(&package).expect("read package");

    extract_certificate(&package, &EchoParser).expect("extract");
    let after = std::fs::read(&package).expect("read package");
    assert_eq!(before, after);
}

#[test]
fn non_archive_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let package = dir.path().join("broken.apk");
    std::fs::write(&package, b"not a zip").expect("write file");

    let result = extract_certificate(&package, &EchoParser);
    assert!(matches!(result, Err(CertificateError::Zip { .. })));
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = extract_certificate(&dir.path().join("absent.apk"), &EchoParser);
    assert!(matches!(result, Err(CertificateError::Io { .. })));
}
