pub mod credential_vault;

pub use credential_vault::{CredentialVault, VaultError};
