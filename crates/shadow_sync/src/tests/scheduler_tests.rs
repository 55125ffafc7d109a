use std::sync::atomic::AtomicUsize;

use super::*;

fn counting_task(counter: &Arc<AtomicUsize>) -> TimerTask {
    let counter = counter.clone();
    Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn manual_timer_fires_only_when_due() {
    let scheduler = ManualScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let _handle = scheduler.schedule(Duration::from_secs(5), counting_task(&fired));

    scheduler.advance(Duration::from_secs(4)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.next_due_in(), Some(Duration::from_secs(1)));

    scheduler.advance(Duration::from_secs(1)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.now(), Duration::from_secs(5));
}

#[tokio::test]
async fn manual_cancel_is_idempotent_and_survives_firing() {
    let scheduler = ManualScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let cancelled = scheduler.schedule(Duration::from_secs(1), counting_task(&fired));
    cancelled.cancel();
    cancelled.cancel();
    assert_eq!(scheduler.pending(), 0);

    let handle = scheduler.schedule(Duration::from_secs(1), counting_task(&fired));
    scheduler.advance(Duration::from_secs(2)).await;
    handle.cancel();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.next_due_in(), None);
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_can_be_cancelled_before_it_fires() {
    let fired = Arc::new(AtomicUsize::new(0));
    let scheduler = TokioScheduler;

    let handle = scheduler.schedule(Duration::from_secs(1), counting_task(&fired));
    let _kept = scheduler.schedule(Duration::from_secs(2), counting_task(&fired));
    handle.cancel();
    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.cancel();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
