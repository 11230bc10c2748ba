use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::account::{create_account, AccountContact, AccountError};
use crate::authorization::AuthorizationError;
use crate::certificate::{default_renewal_time, CertificateData, CertificateError, CertificateKey};
use crate::directory::Directory;
use crate::jws::{AccountKey, JwsError};
use crate::order::{Identifier, OrderError};
use crate::registry::CertificateRegistry;
use crate::solver::{HttpChallengeSolver, HttpSolverConfig, SolverError};
use crate::store::{DataStore, StoreError};
use crate::tls::ManagedCertResolver;
use crate::transport::{Transport, TransportError};
use crate::wait::{StopSignal, WaitError};
use crate::worker::spawn_worker;

/// Varsayılan User-Agent değeri.
const DEFAULT_USER_AGENT: &str = "sertomat-acme (+https://github.com/neudzulab/sertomat)";

/// badNonce yeniden deneme bütçesi varsayılanı (Let's Encrypt sınıfı).
const DEFAULT_BAD_NONCE_RETRY_LIMIT: usize = 3;

/// İstemci genel hata türü; işçi olaylarında da taşınır.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("veri deposu hatası: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error("varsayılan HTTP istemcisi kurulamadı: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// DNS-01 protokolde tanımlıdır ama bu çekirdekte çözücüsü yoktur.
    #[error("DNS-01 challenge çözümü desteklenmiyor")]
    UnsupportedChallenge,
    #[error("sertifika işçisi panikledi: {message}")]
    WorkerPanic { message: String },
    #[error("istemci başlatılmadı")]
    NotStarted,
}

/// Sertifika işçisinin tüketiciye bildirdiği olay.
///
/// Kanal, işçi sonlandığında kapanır; kalıcı bir hata tek bir `Failed`
/// olayı olarak gelir.
#[derive(Debug)]
pub enum CertificateEvent {
    /// Yeni bir sertifika anlık görüntüsü hazır.
    Ready(Arc<CertificateData>),
    /// İşçi ilerleyemedi ve sonlanıyor.
    Failed(ClientError),
}

/// Hesap anahtarı üretim kancası.
pub type AccountKeyGenerator = Arc<dyn Fn() -> Result<AccountKey, JwsError> + Send + Sync>;

/// Sertifika anahtarı üretim kancası.
pub type CertificateKeyGenerator =
    Arc<dyn Fn() -> Result<CertificateKey, CertificateError> + Send + Sync>;

/// Yenileme zamanı hesaplama kancası.
pub type RenewalTimeFn = Arc<dyn Fn(&CertificateData) -> OffsetDateTime + Send + Sync>;

/// İstemci yapılandırması.
///
/// Zorunlu alanlar `new` ile verilir; geri kalanı alan erişimiyle
/// değiştirilebilir ve boş bırakıldığında makul varsayılanlar kullanılır.
pub struct ClientConfig {
    pub directory_uri: Url,
    pub data_store: Arc<dyn DataStore>,
    pub user_agent: Option<String>,
    pub contacts: Vec<AccountContact>,
    pub http_client: Option<reqwest::Client>,
    pub generate_account_key: Option<AccountKeyGenerator>,
    pub generate_certificate_key: Option<CertificateKeyGenerator>,
    pub renewal_time: Option<RenewalTimeFn>,
    /// badNonce yeniden deneme bütçesi. Pebble gibi nonce'ları agresif
    /// eskiten test sunucularında yüksek (ör. 100) tutulur, üretimde 3
    /// yeterlidir.
    pub bad_nonce_retry_limit: Option<usize>,
    /// Tek bir order turuna tanınan toplam süre.
    pub order_timeout: Option<Duration>,
    pub http_challenge_solver: Option<HttpSolverConfig>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(directory_uri: Url, data_store: Arc<dyn DataStore>) -> Self {
        Self {
            directory_uri,
            data_store,
            user_agent: None,
            contacts: Vec::new(),
            http_client: None,
            generate_account_key: None,
            generate_certificate_key: None,
            renewal_time: None,
            bad_nonce_retry_limit: None,
            order_timeout: None,
            http_challenge_solver: None,
        }
    }
}

/// İşçilerin paylaştığı istemci çekirdeği.
pub(crate) struct ClientCore {
    pub(crate) transport: Transport,
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) registry: Arc<CertificateRegistry>,
    pub(crate) solver: Option<HttpChallengeSolver>,
    pub(crate) generate_certificate_key: CertificateKeyGenerator,
    pub(crate) renewal_time: RenewalTimeFn,
    pub(crate) order_timeout: Option<Duration>,
    directory: RwLock<Option<Directory>>,
    stop_rx: watch::Receiver<bool>,
}

impl ClientCore {
    pub(crate) fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.stop_rx.clone())
    }

    pub(crate) fn directory(&self) -> Result<Directory, ClientError> {
        self.directory
            .read()
            .expect("directory kilidi zehirlenmemeli")
            .clone()
            .ok_or(ClientError::NotStarted)
    }

    fn set_directory(&self, directory: Directory) {
        *self
            .directory
            .write()
            .expect("directory kilidi zehirlenmemeli") = Some(directory);
    }

    fn is_started(&self) -> bool {
        self.directory
            .read()
            .expect("directory kilidi zehirlenmemeli")
            .is_some()
    }
}

/// RFC 8555 ACME istemcisi.
///
/// `start` directory'yi çeker, hesabı yükler veya açar ve yapılandırıldıysa
/// HTTP-01 responder'ı hesap thumbprint'i ile başlatır. Her
/// `request_certificate` çağrısı bağımsız bir işçi görevi başlatır; işçi
/// sertifikayı edinir, kayda yayınlar ve yenilemeleri süresiz zamanlar.
pub struct Client {
    core: Arc<ClientCore>,
    generate_account_key: AccountKeyGenerator,
    contacts: Vec<AccountContact>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Yapılandırmadan yeni bir istemci kurar.
    ///
    /// # Errors
    ///
    /// Varsayılan HTTP istemcisi kurulamazsa `ClientError` döner.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = match config.http_client {
            Some(client) => client,
            None => default_http_client()?,
        };

        let user_agent = config
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned());

        let transport = Transport::new(
            http_client,
            user_agent,
            config.directory_uri,
            config
                .bad_nonce_retry_limit
                .unwrap_or(DEFAULT_BAD_NONCE_RETRY_LIMIT),
        );

        let (stop_tx, stop_rx) = watch::channel(false);

        let core = ClientCore {
            transport,
            store: config.data_store,
            registry: Arc::new(CertificateRegistry::new()),
            solver: config.http_challenge_solver.map(HttpChallengeSolver::new),
            generate_certificate_key: config
                .generate_certificate_key
                .unwrap_or_else(|| Arc::new(CertificateKey::generate_p256)),
            renewal_time: config
                .renewal_time
                .unwrap_or_else(|| Arc::new(default_renewal_time)),
            order_timeout: config.order_timeout,
            directory: RwLock::new(None),
            stop_rx,
        };

        Ok(Self {
            core: Arc::new(core),
            generate_account_key: config
                .generate_account_key
                .unwrap_or_else(|| Arc::new(|| Ok(AccountKey::generate_p256()))),
            contacts: config.contacts,
            stop_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// İstemciyi başlatır: directory, hesap ve responder.
    ///
    /// # Errors
    ///
    /// Directory çekilemez, hesap açılamaz veya responder başlatılamazsa
    /// `ClientError` döner.
    pub async fn start(&self) -> Result<(), ClientError> {
        let directory = self.core.transport.fetch_directory().await?;

        debug!("hesap verisi yükleniyor");
        let account = match self.core.store.load_account().await {
            Ok(account) => {
                self.core
                    .transport
                    .install_account_key(Arc::clone(&account.key), Some(account.uri.clone()));
                account
            }
            Err(StoreError::AccountNotFound) => {
                let key = Arc::new((self.generate_account_key)()?);
                let account =
                    create_account(&self.core.transport, &directory, key, &self.contacts).await?;
                self.core.store.store_account(&account).await?;
                account
            }
            Err(err) => return Err(err.into()),
        };

        info!(account = %account.uri, "ACME hesabı kullanılıyor");

        if let Some(solver) = &self.core.solver {
            solver.start(account.thumbprint()).await?;
        }

        self.core.set_directory(directory);
        Ok(())
    }

    /// İstemciyi durdurur; responder kapanır ve tüm işçiler sonlanır.
    ///
    /// Durdurma sinyali her bloklanmış beklemeyi derhal uyandırır; devam
    /// eden her `request_certificate` olay kanalı kapanır.
    pub async fn stop(&self) {
        if let Some(solver) = &self.core.solver {
            solver.stop().await;
        }

        let _ = self.stop_tx.send(true);

        let workers = {
            let mut guard = self.workers.lock().expect("işçi kilidi zehirlenmemeli");
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Bir sertifika için işçi başlatır ve olay kanalını döndürür.
    ///
    /// Depoda aynı isim, birebir aynı identifier listesi ve aynı geçerlilik
    /// ile kayıtlı bir sertifika varsa işçi o veriyle devam eder: mevcut
    /// sertifika hemen yayınlanır ve yenileme mevcut bitiş zamanından
    /// zamanlanır. Aksi halde temiz bir order başlatılır.
    ///
    /// # Errors
    ///
    /// İstemci başlatılmamışsa veya depo okunamazsa `ClientError` döner.
    pub async fn request_certificate(
        &self,
        name: &str,
        identifiers: Vec<Identifier>,
        validity_days: u32,
    ) -> Result<mpsc::Receiver<CertificateEvent>, ClientError> {
        if !self.core.is_started() {
            return Err(ClientError::NotStarted);
        }

        let stored = match self.core.store.load_certificate(name).await {
            Ok(data) => Some(data),
            Err(StoreError::CertificateNotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };

        let data = certificate_request_state(stored, name, identifiers, validity_days);

        let (tx, rx) = mpsc::channel(1);
        let handle = spawn_worker(Arc::clone(&self.core), data, tx);
        self.workers
            .lock()
            .expect("işçi kilidi zehirlenmemeli")
            .push(handle);

        Ok(rx)
    }

    /// Kayıttaki güncel sertifika anlık görüntüsünü döndürür.
    #[must_use]
    pub fn certificate(&self, name: &str) -> Option<Arc<CertificateData>> {
        self.core.registry.get(name)
    }

    /// Sertifika yayınlanana kadar bekler; istemci durdurulursa `None` döner.
    pub async fn wait_for_certificate(&self, name: &str) -> Option<Arc<CertificateData>> {
        self.core
            .registry
            .wait_for(name, self.core.stop_signal())
            .await
    }

    /// TLS sunucusuna takılacak sertifika çözücüsünü döndürür.
    ///
    /// Sertifika henüz yayınlanmadıysa çözücü el sıkışmada `None` üretir.
    #[must_use]
    pub fn certificate_resolver(&self, name: &str) -> Arc<ManagedCertResolver> {
        Arc::new(ManagedCertResolver::new(
            Arc::clone(&self.core.registry),
            name,
        ))
    }
}

/// Depodaki kayıt ile istenen parametreleri karşılaştırıp işçinin
/// başlangıç durumunu kurar.
fn certificate_request_state(
    stored: Option<CertificateData>,
    name: &str,
    identifiers: Vec<Identifier>,
    validity_days: u32,
) -> CertificateData {
    if let Some(stored) = stored {
        if stored.identifiers == identifiers && stored.validity_days == validity_days {
            return stored;
        }
        debug!(certificate = %name, "depodaki kayıt istekle uyuşmuyor, yeni order açılacak");
    }

    CertificateData::new(name, identifiers, validity_days)
}

/// Varsayılan HTTP istemcisi.
///
/// Bağlantı havuzu ve zaman aşımı değerleri dışarıdan istemci verilmeden
/// kullanılan muhafazakar varsayılanlardır.
fn default_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(60))
        .build()
}
