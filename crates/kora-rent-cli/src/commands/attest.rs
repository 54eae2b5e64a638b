//! `kora-rent attest`: attestation generation and verification.

use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::info;

use kora_rent_core::attestation::{self, AttestationDocument};
use kora_rent_core::{report, OperatorKeypair};

use super::{build_config, open_store};

pub fn generate(
    data_dir: &Path,
    network: &str,
    rpc: Option<&str>,
    output: Option<&Path>,
    keypair: Option<&Path>,
) -> Result<()> {
    let keypair = match keypair {
        Some(path) => Some(
            OperatorKeypair::load(path)
                .with_context(|| format!("cannot load keypair {}", path.display()))?,
        ),
        None => None,
    };

    let config = build_config(network, rpc, false);
    let store = open_store(data_dir, &config)?;

    let document = attestation::generate(&store, &config, None, keypair.as_ref())?;
    let encoded = document.to_canonical_json()?;

    match output {
        Some(path) => {
            report::write_atomic(path, &encoded)?;
            info!(
                path = %path.display(),
                hash = %document.attestation_hash,
                signed = document.signature.is_some(),
                "attestation written"
            );
        },
        None => println!("{encoded}"),
    }
    Ok(())
}

pub fn verify(file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read attestation {}", file.display()))?;
    let document = AttestationDocument::from_json(&contents)?;

    attestation::verify(&document)
        .with_context(|| format!("attestation {} failed verification", file.display()))?;
    info!(hash = %document.attestation_hash, "attestation verified");
    Ok(())
}
