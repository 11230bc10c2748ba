use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::account::AccountData;
use crate::certificate::CertificateData;

/// Veri deposu hataları.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Depoda kayıtlı hesap yok.
    #[error("veri deposunda hesap bulunamadı")]
    AccountNotFound,
    /// Depoda bu isimle kayıtlı sertifika yok.
    #[error("veri deposunda sertifika bulunamadı: {name}")]
    CertificateNotFound { name: String },
    #[error("veri deposu G/Ç hatası: {0}")]
    Io(#[from] std::io::Error),
    #[error("veri deposu kaydı çözümlenemedi: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Hesap ve sertifika kayıtlarının kalıcı deposu.
///
/// Kütüphane yalnızca bu sözleşmeye bağımlıdır; dosya sistemi
/// implementasyonu varsayılan olarak sunulur, tüketiciler kendi
/// backend'lerini takabilir.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Hesap verisini yükler.
    ///
    /// # Errors
    ///
    /// Kayıt yoksa `StoreError::AccountNotFound` döner.
    async fn load_account(&self) -> Result<AccountData, StoreError>;

    /// Hesap verisini kalıcı hale getirir.
    async fn store_account(&self, account: &AccountData) -> Result<(), StoreError>;

    /// İsimle kayıtlı sertifika verisini yükler.
    ///
    /// # Errors
    ///
    /// Kayıt yoksa `StoreError::CertificateNotFound` döner.
    async fn load_certificate(&self, name: &str) -> Result<CertificateData, StoreError>;

    /// Sertifika verisini kalıcı hale getirir.
    async fn store_certificate(&self, data: &CertificateData) -> Result<(), StoreError>;
}

/// Dosya sistemi tabanlı veri deposu.
///
/// Yerleşim: kökte `account.json`, sertifikalar `certificates/<name>.json`
/// altında. Her yazma önce `<path>.tmp` dosyasına yapılır, sonra atomik
/// rename ile yerine taşınır. Dizinler `0700`, dosyalar `0600` kipiyle
/// oluşturulur.
#[derive(Debug)]
pub struct FileSystemDataStore {
    root: PathBuf,
    account_path: PathBuf,
    certificates_dir: PathBuf,
}

impl FileSystemDataStore {
    /// Kök dizini oluşturup depoyu hazırlar.
    ///
    /// # Errors
    ///
    /// Dizin oluşturulamazsa `StoreError::Io` döner.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        create_private_dir(&root)?;

        let certificates_dir = root.join("certificates");
        Ok(Self {
            account_path: root.join("account.json"),
            certificates_dir,
            root,
        })
    }

    /// Depo kök dizinini döndürür.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn certificate_path(&self, name: &str) -> PathBuf {
        self.certificates_dir.join(format!("{name}.json"))
    }

    async fn write_atomically(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp_path = tmp_path_for(path);

        tokio::fs::write(&tmp_path, contents).await?;
        set_private_file_mode(&tmp_path).await?;

        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }
}

#[async_trait]
impl DataStore for FileSystemDataStore {
    async fn load_account(&self) -> Result<AccountData, StoreError> {
        let bytes = match tokio::fs::read(&self.account_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::AccountNotFound);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store_account(&self, account: &AccountData) -> Result<(), StoreError> {
        debug!(path = %self.account_path.display(), "hesap verisi yazılıyor");

        let contents = serde_json::to_vec_pretty(account)?;
        self.write_atomically(&self.account_path, &contents).await
    }

    async fn load_certificate(&self, name: &str) -> Result<CertificateData, StoreError> {
        let path = self.certificate_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CertificateNotFound {
                    name: name.to_owned(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store_certificate(&self, data: &CertificateData) -> Result<(), StoreError> {
        create_private_dir(&self.certificates_dir)?;

        let path = self.certificate_path(&data.name);
        debug!(path = %path.display(), "sertifika verisi yazılıyor");

        let contents = serde_json::to_vec_pretty(data)?;
        self.write_atomically(&path, &contents).await
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".tmp");
    PathBuf::from(os_string)
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::DirBuilder::new().recursive(true).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(unix)]
async fn set_private_file_mode(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_private_file_mode(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use time::macros::datetime;
    use url::Url;

    use crate::certificate::test_support::self_signed_chain;
    use crate::certificate::CertificateKey;
    use crate::jws::AccountKey;
    use crate::order::Identifier;

    use super::*;

    fn sample_account() -> AccountData {
        AccountData {
            uri: Url::parse("https://acme.example/acct/42").unwrap(),
            key: Arc::new(AccountKey::generate_p256()),
        }
    }

    fn sample_certificate(name: &str) -> CertificateData {
        CertificateData {
            name: name.to_owned(),
            identifiers: vec![Identifier::dns("localhost")],
            validity_days: 1,
            private_key: Some(Arc::new(
                CertificateKey::generate_p256().expect("anahtar üretilmeli"),
            )),
            chain: self_signed_chain(
                &["localhost"],
                datetime!(2024-05-01 00:00 UTC),
                datetime!(2024-08-01 00:00 UTC),
            ),
        }
    }

    #[tokio::test]
    async fn missing_account_yields_not_found() {
        let dir = tempfile::tempdir().expect("geçici dizin");
        let store = FileSystemDataStore::new(dir.path()).expect("depo kurulmalı");

        let err = store.load_account().await.unwrap_err();
        assert!(matches!(err, StoreError::AccountNotFound));
    }

    #[tokio::test]
    async fn account_round_trip() {
        let dir = tempfile::tempdir().expect("geçici dizin");
        let store = FileSystemDataStore::new(dir.path()).expect("depo kurulmalı");
        let account = sample_account();

        store.store_account(&account).await.expect("hesap yazılmalı");
        let loaded = store.load_account().await.expect("hesap okunmalı");

        assert_eq!(loaded.uri, account.uri);
        assert_eq!(loaded.thumbprint(), account.thumbprint());
        assert!(dir.path().join("account.json").exists());
        assert!(!dir.path().join("account.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_certificate_yields_not_found() {
        let dir = tempfile::tempdir().expect("geçici dizin");
        let store = FileSystemDataStore::new(dir.path()).expect("depo kurulmalı");

        let err = store.load_certificate("yok").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::CertificateNotFound { name } if name == "yok"
        ));
    }

    #[tokio::test]
    async fn certificate_round_trip() {
        let dir = tempfile::tempdir().expect("geçici dizin");
        let store = FileSystemDataStore::new(dir.path()).expect("depo kurulmalı");
        let data = sample_certificate("web");

        store
            .store_certificate(&data)
            .await
            .expect("sertifika yazılmalı");
        let loaded = store.load_certificate("web").await.expect("sertifika okunmalı");

        assert_eq!(loaded.name, data.name);
        assert_eq!(loaded.identifiers, data.identifiers);
        assert_eq!(loaded.validity_days, data.validity_days);
        assert_eq!(loaded.chain, data.chain);
        assert!(dir
            .path()
            .join("certificates")
            .join("web.json")
            .exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_created_with_private_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("geçici dizin");
        let store = FileSystemDataStore::new(dir.path().join("depo")).expect("depo kurulmalı");
        store
            .store_account(&sample_account())
            .await
            .expect("hesap yazılmalı");

        let dir_mode = std::fs::metadata(dir.path().join("depo"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = std::fs::metadata(dir.path().join("depo").join("account.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
