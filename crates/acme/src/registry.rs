use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;
use tracing::debug;

use crate::certificate::CertificateData;
use crate::wait::StopSignal;

/// Yayınlanmış sertifikaların süreç içi kaydı.
///
/// Yayın sırasında kilit sırası sabittir: önce sertifika haritasının yazma
/// kilidi, sonra bekleyen listesi. `wait_for` kayıt yaparken aynı sırayı
/// kullanır; böylece bekleyen ya haritadan ya kanaldan tam olarak bir kez
/// değer görür.
#[derive(Debug, Default)]
pub struct CertificateRegistry {
    certificates: RwLock<HashMap<String, Arc<CertificateData>>>,
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Arc<CertificateData>>>>>,
}

impl CertificateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kayıtlı sertifikayı döndürür.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CertificateData>> {
        self.certificates
            .read()
            .expect("sertifika kilidi zehirlenmemeli")
            .get(name)
            .cloned()
    }

    /// Yeni anlık görüntüyü kaydeder ve bekleyenlere dağıtır.
    ///
    /// Dağıtım, harita yazma kilidi bırakılmadan tamamlanır; `store`
    /// döndüğünde her okuyucu yeni değeri görür.
    pub fn store(&self, data: Arc<CertificateData>) {
        let name = data.name.clone();

        let mut certificates = self
            .certificates
            .write()
            .expect("sertifika kilidi zehirlenmemeli");
        certificates.insert(name.clone(), Arc::clone(&data));

        let mut waiters = self
            .waiters
            .lock()
            .expect("bekleyen kilidi zehirlenmemeli");
        if let Some(pending) = waiters.remove(&name) {
            debug!(certificate = %name, waiters = pending.len(), "bekleyenlere sertifika dağıtılıyor");
            for waiter in pending {
                // Alıcısı düşmüş bekleyenler sessizce atlanır.
                let _ = waiter.send(Arc::clone(&data));
            }
        }
        drop(waiters);
        drop(certificates);
    }

    /// Sertifika yayınlanana kadar bekler.
    ///
    /// Sertifika zaten kayıtlıysa hemen döner; değilse bekleyen olarak
    /// kaydolur ve yayın ya da durdurma sinyaliyle uyanır. Durdurulduğunda
    /// `None` döner.
    pub async fn wait_for(&self, name: &str, mut stop: StopSignal) -> Option<Arc<CertificateData>> {
        let rx = {
            let certificates = self
                .certificates
                .write()
                .expect("sertifika kilidi zehirlenmemeli");
            if let Some(data) = certificates.get(name) {
                return Some(Arc::clone(data));
            }

            let (tx, rx) = oneshot::channel();
            self.waiters
                .lock()
                .expect("bekleyen kilidi zehirlenmemeli")
                .entry(name.to_owned())
                .or_default()
                .push(tx);
            rx
        };

        tokio::select! {
            received = rx => received.ok(),
            () = stop.stopped() => None,
        }
    }
}
