#![cfg(unix)]

mod common;

use std::time::Duration;

use nix::sys::signal::{raise, Signal};

use self_supervisor::{ShutdownReason, SignalRelay, SupervisorBuilder, SupervisorExit};

use common::{live_generation, run_supervisor, Scratch, ScriptedSpawner, Step};

// Raises a real SIGTERM at the test process; it must stay the only test in
// this binary.
#[tokio::test]
async fn test_sigterm_is_relayed_to_live_worker() {
    let scratch = Scratch::new("sigterm");
    let spawner = ScriptedSpawner::new([], Step::Hang);

    let relay = SignalRelay::install().unwrap();
    let handle = run_supervisor(SupervisorBuilder::new().build(), &scratch, &spawner);
    let guard = relay.forward_to(handle.clone());

    assert_eq!(live_generation(&handle).await, 1);
    raise(Signal::SIGTERM).unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("supervisor did not stop after SIGTERM");
    assert_eq!(
        exit.unwrap(),
        SupervisorExit::ShutDown(ShutdownReason::Terminate)
    );
    assert_eq!(spawner.terminated(), 1);
    assert_eq!(spawner.spawned(), 1);

    guard.stop().await;
}
