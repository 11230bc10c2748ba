use std::future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};

/// Bekleme kesilme nedenleri.
///
/// Polling döngülerindeki her bekleme üç yoldan biriyle sonlanır: süre
/// dolar, istemci durdurulur veya order için tanınan süre aşılır. Kesilme
/// hataları hiçbir katmanda yeniden denenmez.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// İstemci durdurma sinyali gönderdi.
    #[error("doğrulama beklemesi durdurma sinyaliyle kesildi")]
    Interrupted,
    /// Order için tanınan süre doldu.
    #[error("doğrulama beklemesi zaman aşımına uğradı")]
    Timeout,
}

/// İstemci geneli durdurma sinyali.
///
/// `watch` kanalının değeri durdurulduğunda `true` olur; gönderici düşerse
/// istemci yok edilmiş demektir ve bu da durdurma sayılır.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    #[must_use]
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Durdurma sinyalinin verilip verilmediğini anlık olarak bildirir.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Durdurma sinyali verilene kadar bekler.
    pub async fn stopped(&mut self) {
        // wait_for Err dönerse gönderici düşmüştür; durdurma olarak ele alınır.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Tek seferde uyunabilecek en uzun süre.
///
/// tokio zamanlayıcısı yaklaşık 2,2 yıldan uzun uykuları kabul etmez;
/// daha uzun bekleyen çağıranlar süre dolumunda yeniden hesap yapar.
pub const MAX_PAUSE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Zamanlayıcı, durdurma sinyali ve order süresi üzerinde üçlü bekleme.
///
/// Her sertifika order'ı kendi bekleme bağlamını alır; `deadline` order
/// başına tanınan toplam süreyi sınırlar.
#[derive(Debug)]
pub struct VerificationWaiter {
    stop: StopSignal,
    deadline: Option<Instant>,
}

impl VerificationWaiter {
    #[must_use]
    pub fn new(stop: StopSignal, timeout: Option<Duration>) -> Self {
        Self {
            stop,
            deadline: timeout.map(|budget| Instant::now() + budget),
        }
    }

    /// Belirtilen süre kadar bekler.
    ///
    /// Süre [`MAX_PAUSE`] ile sınırlanır; daha uzun bekleyenler dönüşte
    /// kalan süreyi yeniden hesaplamalıdır.
    ///
    /// # Errors
    ///
    /// * `WaitError::Interrupted` - istemci durdurulursa.
    /// * `WaitError::Timeout` - order süresi dolarsa.
    pub async fn pause(&mut self, delay: Duration) -> Result<(), WaitError> {
        let delay = delay.min(MAX_PAUSE);
        let deadline = self.deadline;
        let deadline_elapsed = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            () = sleep(delay) => Ok(()),
            () = self.stop.stopped() => Err(WaitError::Interrupted),
            () = deadline_elapsed => Err(WaitError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_pair() -> (watch::Sender<bool>, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, StopSignal::new(rx))
    }

    #[tokio::test(start_paused = true)]
    async fn pause_completes_after_delay() {
        let (_tx, stop) = signal_pair();
        let mut waiter = VerificationWaiter::new(stop, None);
        waiter
            .pause(Duration::from_secs(3))
            .await
            .expect("bekleme tamamlanmalı");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_pause() {
        let (tx, stop) = signal_pair();
        let mut waiter = VerificationWaiter::new(stop, None);

        let pause = tokio::spawn(async move { waiter.pause(Duration::from_secs(3600)).await });
        tx.send(true).expect("sinyal gönderilmeli");

        assert_eq!(pause.await.unwrap(), Err(WaitError::Interrupted));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_counts_as_stop() {
        let (tx, stop) = signal_pair();
        let mut waiter = VerificationWaiter::new(stop, None);
        drop(tx);

        assert_eq!(
            waiter.pause(Duration::from_secs(3600)).await,
            Err(WaitError::Interrupted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout() {
        let (_tx, stop) = signal_pair();
        let mut waiter = VerificationWaiter::new(stop, Some(Duration::from_secs(5)));

        assert_eq!(
            waiter.pause(Duration::from_secs(3600)).await,
            Err(WaitError::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn short_pause_beats_deadline() {
        let (_tx, stop) = signal_pair();
        let mut waiter = VerificationWaiter::new(stop, Some(Duration::from_secs(3600)));
        waiter
            .pause(Duration::from_secs(1))
            .await
            .expect("bekleme tamamlanmalı");
    }
}
