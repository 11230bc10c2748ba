use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::authorization::{
    fetch_authorization, select_challenge, submit_challenge, wait_for_authorization_valid,
    wait_for_challenge_valid, Authorization, AuthorizationError, Challenge, ChallengeData,
    ChallengeStatus,
};
use crate::certificate::{decode_pem_chain, generate_csr, CertificateData};
use crate::client::{CertificateEvent, ClientCore, ClientError};
use crate::order::{
    download_certificate, fetch_order, finalize_order, submit_order, wait_for_order_ready,
    wait_for_order_valid, NewOrder, OrderError,
};
use crate::wait::{StopSignal, VerificationWaiter, WaitError};

/// İlk sipariş denemesi başarısız olduğunda kullanılan bekleme.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Yeniden denemeler arasındaki en uzun bekleme.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Sertifika işçisini bir gözetmen görevi altında başlatır.
///
/// İşçi gövdesi ayrı bir görevde koşar; panik gözetmen tarafından
/// yakalanıp son bir hata olayına çevrilir ve olay kanalı her durumda
/// kapanır.
pub(crate) fn spawn_worker(
    core: Arc<ClientCore>,
    data: CertificateData,
    events: mpsc::Sender<CertificateEvent>,
) -> JoinHandle<()> {
    let name = data.name.clone();

    tokio::spawn(async move {
        let panic_events = events.clone();
        let mut stop = core.stop_signal();
        let inner = tokio::spawn(worker_main(Arc::clone(&core), data, events));

        match inner.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                error!(certificate = %name, panic = %message, "sertifika işçisi panikledi");
                send_event(
                    &panic_events,
                    &mut stop,
                    CertificateEvent::Failed(ClientError::WorkerPanic { message }),
                )
                .await;
            }
            Err(_) => {}
        }
    })
}

async fn worker_main(
    core: Arc<ClientCore>,
    mut data: CertificateData,
    events: mpsc::Sender<CertificateEvent>,
) {
    let mut stop = core.stop_signal();
    let mut renewal_at = OffsetDateTime::now_utc();

    if data.contains_certificate() {
        // Depodan yüklenmiş bir sertifika varsa varlığı hemen duyurulur.
        renewal_at = (core.renewal_time)(&data);
        publish(&core, &mut data, &events, &mut stop).await;
    }

    loop {
        if OffsetDateTime::now_utc() < renewal_at {
            info!(certificate = %data.name, until = %renewal_at, "yenileme için bekleniyor");
        }
        // Beklemeler MAX_PAUSE ile sınırlı olduğundan hedefe ulaşana dek
        // dilim dilim uyunur.
        loop {
            let now = OffsetDateTime::now_utc();
            if renewal_at <= now {
                break;
            }
            let delay = std::time::Duration::try_from(renewal_at - now).unwrap_or_default();
            if pause(&stop, delay).await.is_err() {
                return;
            }
        }

        // Sipariş başarısız olursa mevcut sertifika korunur ve artan
        // aralıklarla yeniden denenir; ilk sertifika hiç alınamıyorsa
        // sunucu zaten başlayamayacağından işçi tek hata olayı ile biter.
        // Kesilme ve zaman aşımı hiçbir katmanda yeniden denenmez:
        // durdurma sessizce çıkar, zaman aşımı son bir hata olayı üretir.
        let mut retry_delay = INITIAL_RETRY_DELAY;
        loop {
            match order_certificate(&core, &mut data, &stop).await {
                Ok(()) => break,
                Err(err) if is_interrupted(&err) => return,
                Err(err) if is_cancellation(&err) => {
                    error!(certificate = %data.name, error = %err, "order süresi doldu");
                    send_event(&events, &mut stop, CertificateEvent::Failed(err)).await;
                    return;
                }
                Err(err) => {
                    if !data.contains_certificate() {
                        error!(certificate = %data.name, error = %err, "sertifika alınamadı");
                        send_event(&events, &mut stop, CertificateEvent::Failed(err)).await;
                        return;
                    }

                    warn!(
                        certificate = %data.name,
                        error = %err,
                        retry_in_secs = retry_delay.as_secs(),
                        "yenileme başarısız, yeniden denenecek"
                    );
                    if pause(&stop, retry_delay).await.is_err() {
                        return;
                    }
                    retry_delay = next_retry_delay(retry_delay);
                }
            }
        }

        renewal_at = (core.renewal_time)(&data);
        publish(&core, &mut data, &events, &mut stop).await;
    }
}

/// Tek bir sipariş turunu yürütür: submit, yetkilendirme doğrulama,
/// finalize, indirme ve kalıcı hale getirme.
async fn order_certificate(
    core: &Arc<ClientCore>,
    data: &mut CertificateData,
    stop: &StopSignal,
) -> Result<(), ClientError> {
    let directory = core.directory()?;
    let mut waiter = VerificationWaiter::new(stop.clone(), core.order_timeout);

    info!(certificate = %data.name, "order gönderiliyor");

    let mut new_order = NewOrder {
        identifiers: data.identifiers.clone(),
        not_before: None,
        not_after: None,
    };
    if data.validity_days != 0 {
        let now = OffsetDateTime::now_utc();
        new_order.not_before = Some(now);
        new_order.not_after = Some(now + time::Duration::days(i64::from(data.validity_days)));
    }

    let order_uri = submit_order(&core.transport, &directory.new_order, &new_order).await?;
    debug!(certificate = %data.name, order = %order_uri, "order oluşturuldu");

    let (order, _) = fetch_order(&core.transport, &order_uri).await?;
    for auth_uri in &order.authorizations {
        let (auth, _) = fetch_authorization(&core.transport, auth_uri).await?;
        validate_authorization(core, &mut waiter, auth_uri, &auth).await?;
    }

    let order = wait_for_order_ready(&core.transport, &mut waiter, &order_uri).await?;
    debug!(certificate = %data.name, "order hazır");

    let key = match &data.private_key {
        Some(key) => Arc::clone(key),
        None => {
            let key = Arc::new((core.generate_certificate_key)()?);
            data.private_key = Some(Arc::clone(&key));
            key
        }
    };
    let csr = generate_csr(&data.identifiers, &key)?;

    finalize_order(&core.transport, &order.finalize, &csr).await?;
    debug!(certificate = %data.name, "order finalize edildi");

    let order = wait_for_order_valid(&core.transport, &mut waiter, &order_uri).await?;

    let certificate_uri = order
        .certificate
        .ok_or(OrderError::MissingCertificateUrl)?;
    let body = download_certificate(&core.transport, &certificate_uri).await?;
    data.chain = decode_pem_chain(&body)?;

    core.store.store_certificate(data).await?;

    Ok(())
}

async fn validate_authorization(
    core: &Arc<ClientCore>,
    waiter: &mut VerificationWaiter,
    auth_uri: &url::Url,
    auth: &Authorization,
) -> Result<(), ClientError> {
    info!(identifier = %auth.identifier, "yetkilendirme doğrulanıyor");

    let challenge = select_challenge(auth, core.solver.is_some())
        .ok_or(AuthorizationError::NoSupportedChallenge)?;

    // Önceki bir order ile doğrulanmış challenge yeniden çözülmez.
    if challenge.status != ChallengeStatus::Valid {
        solve_challenge(core, waiter, challenge).await?;
    }

    wait_for_authorization_valid(&core.transport, waiter, auth_uri).await?;
    debug!(identifier = %auth.identifier, "yetkilendirme hazır");

    Ok(())
}

async fn solve_challenge(
    core: &Arc<ClientCore>,
    waiter: &mut VerificationWaiter,
    challenge: &Challenge,
) -> Result<(), ClientError> {
    setup_challenge(core, challenge)?;

    // Token kurulduktan sonra her çıkış yolunda tam bir kez geri alınır.
    let outcome = async {
        submit_challenge(&core.transport, &challenge.url).await?;
        wait_for_challenge_valid(&core.transport, waiter, &challenge.url).await?;
        Ok(())
    }
    .await;

    teardown_challenge(core, challenge);

    outcome
}

fn setup_challenge(core: &Arc<ClientCore>, challenge: &Challenge) -> Result<(), ClientError> {
    match &challenge.data {
        ChallengeData::Http01 { token } => {
            let solver = core
                .solver
                .as_ref()
                .ok_or(AuthorizationError::NoSupportedChallenge)?;
            solver.add_token(token);
            Ok(())
        }
        ChallengeData::Dns01 { .. } => Err(ClientError::UnsupportedChallenge),
        ChallengeData::Unknown { .. } => {
            Err(AuthorizationError::NoSupportedChallenge.into())
        }
    }
}

fn teardown_challenge(core: &Arc<ClientCore>, challenge: &Challenge) {
    if let ChallengeData::Http01 { token } = &challenge.data {
        if let Some(solver) = core.solver.as_ref() {
            solver.discard_token(token);
        }
    }
}

async fn publish(
    core: &Arc<ClientCore>,
    data: &mut CertificateData,
    events: &mpsc::Sender<CertificateEvent>,
    stop: &mut StopSignal,
) {
    // Anlık görüntü zincirin sahipliğini alır; işçi kopyası bir sonraki
    // yenilemeye aynı anahtar ve boş zincirle devam eder.
    let snapshot = Arc::new(data.extract_snapshot());
    core.registry.store(Arc::clone(&snapshot));
    send_event(events, stop, CertificateEvent::Ready(snapshot)).await;
}

async fn send_event(
    events: &mpsc::Sender<CertificateEvent>,
    stop: &mut StopSignal,
    event: CertificateEvent,
) {
    tokio::select! {
        result = events.send(event) => {
            if result.is_err() {
                debug!("olay kanalının alıcısı kapanmış");
            }
        }
        () = stop.stopped() => {}
    }
}

async fn pause(stop: &StopSignal, delay: Duration) -> Result<(), WaitError> {
    VerificationWaiter::new(stop.clone(), None).pause(delay).await
}

fn next_retry_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RETRY_DELAY)
}

/// Durdurma sinyalinden kaynaklanan kesilmeleri yakalar; işçi bu durumda
/// olay üretmeden çıkar çünkü tüketici zaten kapanmaktadır.
fn is_interrupted(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Wait(WaitError::Interrupted)
            | ClientError::Order(OrderError::Wait(WaitError::Interrupted))
            | ClientError::Authorization(AuthorizationError::Wait(WaitError::Interrupted))
    )
}

/// Her iki iptal türünü yakalar: durdurma sinyali ve order süresinin
/// dolması. İkisi de hiçbir katmanda yeniden denenmez.
fn is_cancellation(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Wait(WaitError::Interrupted | WaitError::Timeout)
            | ClientError::Order(OrderError::Wait(
                WaitError::Interrupted | WaitError::Timeout
            ))
            | ClientError::Authorization(AuthorizationError::Wait(
                WaitError::Interrupted | WaitError::Timeout
            ))
    )
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "bilinmeyen panik değeri".to_owned()
    }
}
