//! The streaming loop: capture notifications feed the smoothing window while a
//! periodic tick maps the smoothed loudness onto every light.

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{error, info, warn};

use crate::audio::{AudioCaptureDevice, CaptureSink, CaptureStream};
use crate::bootstrap::{establish_session, ConnectionBootstrap};
use crate::lights::{LightController, LightHandle};
use crate::{
    BridgeConfig, DiscoLightsError, LightCommand, Profile, Result, SharedWindow, ThresholdMapper,
};

/// Lifecycle of a [`CaptureLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connected,
    Streaming,
    Stopped,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub average: f32,
    pub command: LightCommand,
}

/// Owns the lights, the smoothing window and the capture stream for the
/// lifetime of a session.
pub struct CaptureLoop<L: LightHandle> {
    profile: Profile,
    state: PipelineState,
    window: SharedWindow,
    mapper: ThresholdMapper,
    lights: Vec<L>,
    stream: Option<Box<dyn CaptureStream>>,
    fault_tx: Sender<DiscoLightsError>,
    fault_rx: Receiver<DiscoLightsError>,
}

impl<L: LightHandle> CaptureLoop<L> {
    pub fn new(profile: Profile) -> Result<Self> {
        profile.validate()?;
        let (fault_tx, fault_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            window: SharedWindow::new(profile.smoothing_capacity),
            mapper: ThresholdMapper::new(profile.bands.iter().copied()),
            profile,
            state: PipelineState::Idle,
            lights: Vec::new(),
            stream: None,
            fault_tx,
            fault_rx,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn lights(&self) -> &[L] {
        &self.lights
    }

    /// Idle → Connected: establishes the bridge session, enumerates the
    /// lights and powers all of them on.
    ///
    /// If any light refuses to switch on, the pipeline stops (switching the
    /// others back off) and the error is returned.
    pub fn connect<B, C>(
        &mut self,
        bootstrap: &B,
        controller: &C,
        bridge: &BridgeConfig,
        interrupt: &Receiver<()>,
    ) -> Result<()>
    where
        B: ConnectionBootstrap + ?Sized,
        C: LightController<Light = L>,
    {
        self.expect_state(PipelineState::Idle)?;

        info!(bridge = %bridge.address, "connecting to bridge...");
        let session = establish_session(bootstrap, &bridge.address, bridge.pairing_wait(), interrupt)?;
        info!(bridge = %session.bridge_address, "connected to bridge");

        self.lights = controller.fetch_lights(&session)?;
        info!(count = self.lights.len(), "found lights");

        // lights already switched on must not be left burning
        let powered: Result<()> = self.lights.iter().try_for_each(|light| light.set_on());
        if let Err(err) = powered {
            error!(%err, "failed to switch lights on");
            if let Err(cleanup) = self.stop() {
                warn!(%cleanup, "cleanup after failed connect was incomplete");
            }
            return Err(err);
        }

        self.state = PipelineState::Connected;
        Ok(())
    }

    /// Connected → Streaming: opens the input stream with the profile's
    /// channel count and starts capture.
    pub fn start<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: AudioCaptureDevice + ?Sized,
    {
        self.expect_state(PipelineState::Connected)?;

        let sink = CaptureSink::new(self.window.clone(), self.fault_tx.clone());
        let mut stream = device.open(self.profile.channels, sink)?;
        stream.start()?;

        self.stream = Some(stream);
        self.state = PipelineState::Streaming;
        info!(profile = %self.profile.name, "press Ctrl+C to stop the recording");
        Ok(())
    }

    /// Reads the smoothed loudness and applies the mapped command to every
    /// light.
    pub fn tick(&self) -> Result<TickReport> {
        self.expect_state(PipelineState::Streaming)?;

        let average = self.window.current_average()?;
        let command = self.mapper.map(average);
        for light in &self.lights {
            light.apply(&command)?;
        }

        Ok(TickReport { average, command })
    }

    /// Ticks at the profile's interval until an interrupt arrives or the
    /// capture or a light fails, then stops the pipeline.
    ///
    /// A closed interrupt channel counts as an interrupt.
    pub fn run(&mut self, interrupt: &Receiver<()>) -> Result<()> {
        self.expect_state(PipelineState::Streaming)?;

        let ticker = crossbeam_channel::tick(self.profile.tick_interval());
        let faults = self.fault_rx.clone();

        let outcome = loop {
            select! {
                recv(interrupt) -> _ => {
                    info!("interrupted by user");
                    break Ok(());
                }
                recv(faults) -> fault => {
                    if let Ok(err) = fault {
                        break Err(err);
                    }
                }
                recv(ticker) -> _ => match self.tick() {
                    Ok(report) => info!(
                        average = report.average,
                        brightness = report.command.brightness,
                        "average volume"
                    ),
                    Err(err) => {
                        error!(%err, "light update failed");
                        break Err(err);
                    }
                },
            }
        };

        let cleanup = self.stop();
        outcome.and(cleanup)
    }

    /// Streaming → Stopped: aborts capture and powers every light off.
    ///
    /// Runs to completion even when individual steps fail; the first failure
    /// is returned afterwards. Calling it again once stopped is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Ok(());
        }

        let mut first_error = None;
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.abort() {
                warn!(%err, "failed to abort audio stream");
                first_error.get_or_insert(err);
            }
        }

        for light in &self.lights {
            if let Err(err) = light.set_off() {
                warn!(light = light.id(), %err, "failed to switch light off");
                first_error.get_or_insert(err);
            }
        }

        self.state = PipelineState::Stopped;
        info!(lights = self.lights.len(), "lights switched off");
        first_error.map_or(Ok(()), Err)
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DiscoLightsError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

impl<L: LightHandle> std::fmt::Debug for CaptureLoop<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLoop")
            .field("profile", &self.profile.name)
            .field("state", &self.state)
            .field("lights", &self.lights.len())
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioBlock, BlockInfo, Session};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        On(String),
        Off(String),
        Brightness(String, u8),
        Color(String, u16, u8),
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    struct FakeLight {
        id: String,
        log: CallLog,
        fail_updates: bool,
        fail_power_on: bool,
    }

    impl FakeLight {
        fn record(&self, call: Call) -> Result<()> {
            self.log.lock().unwrap().push(call);
            Ok(())
        }
    }

    impl LightHandle for FakeLight {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_on(&self) -> Result<()> {
            if self.fail_power_on {
                return Err(DiscoLightsError::Bridge {
                    address: "fake".into(),
                    description: "light unreachable".into(),
                });
            }
            self.record(Call::On(self.id.clone()))
        }

        fn set_off(&self) -> Result<()> {
            self.record(Call::Off(self.id.clone()))
        }

        fn set_brightness(&self, level: u8) -> Result<()> {
            if self.fail_updates {
                return Err(DiscoLightsError::Bridge {
                    address: "fake".into(),
                    description: "light unreachable".into(),
                });
            }
            self.record(Call::Brightness(self.id.clone(), level))
        }

        fn set_color(&self, hue: u16, saturation: u8) -> Result<()> {
            self.record(Call::Color(self.id.clone(), hue, saturation))
        }
    }

    struct FakeController {
        ids: Vec<&'static str>,
        log: CallLog,
        fail_updates: bool,
        unreachable: Option<&'static str>,
    }

    impl FakeController {
        fn new(ids: Vec<&'static str>) -> Self {
            Self {
                ids,
                log: CallLog::default(),
                fail_updates: false,
                unreachable: None,
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|call| wanted(call)).count()
        }
    }

    impl LightController for FakeController {
        type Light = FakeLight;

        fn fetch_lights(&self, _session: &Session) -> Result<Vec<FakeLight>> {
            Ok(self
                .ids
                .iter()
                .map(|id| FakeLight {
                    id: id.to_string(),
                    log: Arc::clone(&self.log),
                    fail_updates: self.fail_updates,
                    fail_power_on: self.unreachable == Some(*id),
                })
                .collect())
        }
    }

    struct StoredSession;

    impl ConnectionBootstrap for StoredSession {
        fn load_existing(&self) -> Result<Session> {
            Ok(Session {
                bridge_address: "10.0.0.2".into(),
                username: "user".into(),
            })
        }

        fn create_new_user(&self, _bridge_address: &str) -> Result<Session> {
            panic!("pairing must not run when a session is stored");
        }
    }

    #[derive(Default)]
    struct StreamCounters {
        starts: AtomicUsize,
        aborts: AtomicUsize,
    }

    struct FakeStream {
        counters: Arc<StreamCounters>,
    }

    impl CaptureStream for FakeStream {
        fn start(&mut self) -> Result<()> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            self.counters.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDevice {
        channels: Option<u16>,
        sink: Option<CaptureSink>,
        counters: Arc<StreamCounters>,
    }

    impl FakeDevice {
        fn feed(&self, samples: &[f32]) -> f32 {
            let channels = usize::from(self.channels.unwrap_or(1));
            let block = AudioBlock::new(samples, channels);
            let info = BlockInfo {
                frames: block.frames(),
                ..BlockInfo::default()
            };
            self.sink.as_ref().expect("stream opened").deliver(&block, &info)
        }
    }

    impl AudioCaptureDevice for FakeDevice {
        fn open(&mut self, channels: u16, sink: CaptureSink) -> Result<Box<dyn CaptureStream>> {
            self.channels = Some(channels);
            self.sink = Some(sink);
            Ok(Box::new(FakeStream {
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    fn streaming(
        profile: Profile,
        controller: &FakeController,
        device: &mut FakeDevice,
    ) -> CaptureLoop<FakeLight> {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = CaptureLoop::new(profile).unwrap();
        pipeline
            .connect(&StoredSession, controller, &BridgeConfig::default(), &rx)
            .unwrap();
        pipeline.start(device).unwrap();
        pipeline
    }

    #[test]
    fn connect_powers_on_every_light() {
        let controller = FakeController::new(vec!["1", "2", "3"]);
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = CaptureLoop::new(Profile::fine()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline
            .connect(&StoredSession, &controller, &BridgeConfig::default(), &rx)
            .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Connected);
        assert_eq!(pipeline.lights().len(), 3);
        assert_eq!(
            controller.calls(),
            vec![Call::On("1".into()), Call::On("2".into()), Call::On("3".into())]
        );
    }

    #[test]
    fn failed_power_on_switches_earlier_lights_back_off() {
        let mut controller = FakeController::new(vec!["1", "2", "3"]);
        controller.unreachable = Some("2");
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = CaptureLoop::new(Profile::fine()).unwrap();

        let err = pipeline
            .connect(&StoredSession, &controller, &BridgeConfig::default(), &rx)
            .unwrap_err();

        assert!(matches!(err, DiscoLightsError::Bridge { .. }));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(controller.count(|call| *call == Call::On("1".into())), 1);
        assert_eq!(controller.count(|call| *call == Call::On("3".into())), 0);
        assert_eq!(controller.count(|call| *call == Call::Off("1".into())), 1);

        // a later stop has nothing left to do
        pipeline.stop().unwrap();
        assert_eq!(controller.count(|call| *call == Call::Off("1".into())), 1);
    }

    #[test]
    fn start_opens_stream_with_profile_channels() {
        let controller = FakeController::new(vec!["1"]);
        let mut device = FakeDevice::default();
        let pipeline = streaming(Profile::fine(), &controller, &mut device);

        assert_eq!(pipeline.state(), PipelineState::Streaming);
        assert_eq!(device.channels, Some(2));
        assert_eq!(device.counters.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loud_blocks_drive_full_brightness_under_coarse_profile() {
        let controller = FakeController::new(vec!["1", "2"]);
        let mut device = FakeDevice::default();
        let pipeline = streaming(Profile::coarse(), &controller, &mut device);

        for _ in 0..3 {
            let loudness = device.feed(&[0.5; 256]);
            assert!((loudness - 0.5).abs() < 1e-6);

            let report = pipeline.tick().unwrap();
            assert_eq!(report.command.brightness, 255);
            assert_eq!(report.command.color, None);
        }

        assert_eq!(
            controller.count(|call| matches!(call, Call::Brightness(_, 255))),
            6
        );
        assert_eq!(controller.count(|call| matches!(call, Call::Color(..))), 0);
    }

    #[test]
    fn fine_profile_sets_brightness_then_color() {
        let controller = FakeController::new(vec!["1"]);
        let mut device = FakeDevice::default();
        let pipeline = streaming(Profile::fine(), &controller, &mut device);

        // stereo block with RMS 0.35 on both channels
        device.feed(&[0.35; 128]);
        let report = pipeline.tick().unwrap();
        assert_eq!(report.command.brightness, 196);

        let calls = controller.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[
                Call::Brightness("1".into(), 196),
                Call::Color("1".into(), 3, 128)
            ]
        );
    }

    #[test]
    fn smoothing_damps_a_single_spike() {
        let controller = FakeController::new(vec!["1"]);
        let mut device = FakeDevice::default();
        let pipeline = streaming(Profile::fine(), &controller, &mut device);

        for _ in 0..99 {
            device.feed(&[0.0; 64]);
        }
        device.feed(&[1.0; 64]);

        let report = pipeline.tick().unwrap();
        assert!((report.average - 0.01).abs() < 1e-4);
        assert_eq!(report.command, LightCommand::dark());
    }

    #[test]
    fn tick_before_any_block_is_dark() {
        let controller = FakeController::new(vec!["1"]);
        let mut device = FakeDevice::default();
        let pipeline = streaming(Profile::coarse(), &controller, &mut device);

        let report = pipeline.tick().unwrap();
        assert_eq!(report.average, 0.0);
        assert!(report.command.is_dark());
    }

    #[test]
    fn interrupt_aborts_stream_and_switches_every_light_off_once() {
        let controller = FakeController::new(vec!["1", "2", "3"]);
        let mut device = FakeDevice::default();
        let mut pipeline = streaming(Profile::coarse(), &controller, &mut device);
        device.feed(&[0.5; 64]);

        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            tx.send(()).unwrap();
            // a second interrupt while cleaning up changes nothing
            let _ = tx.send(());
        });

        pipeline.run(&rx).unwrap();
        sender.join().unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(device.counters.aborts.load(Ordering::SeqCst), 1);
        for id in ["1", "2", "3"] {
            assert_eq!(
                controller.count(|call| *call == Call::Off(id.to_string())),
                1,
                "light {id}"
            );
        }

        pipeline.stop().unwrap();
        assert_eq!(controller.count(|call| matches!(call, Call::Off(_))), 3);
        assert_eq!(device.counters.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interrupt_before_first_tick_still_cleans_up() {
        let controller = FakeController::new(vec!["1", "2"]);
        let mut device = FakeDevice::default();
        let mut pipeline = streaming(Profile::fine(), &controller, &mut device);

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(()).unwrap();
        pipeline.run(&rx).unwrap();

        assert_eq!(device.counters.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(controller.count(|call| matches!(call, Call::Off(_))), 2);
    }

    #[test]
    fn closed_interrupt_channel_stops_the_loop() {
        let controller = FakeController::new(vec!["1", "2"]);
        let mut device = FakeDevice::default();
        let mut pipeline = streaming(Profile::coarse(), &controller, &mut device);

        let (tx, rx) = crossbeam_channel::unbounded::<()>();
        drop(tx);
        pipeline.run(&rx).unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(device.counters.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(controller.count(|call| matches!(call, Call::Off(_))), 2);
    }

    #[test]
    fn capture_fault_surfaces_after_cleanup() {
        let controller = FakeController::new(vec!["1"]);
        let mut device = FakeDevice::default();
        let mut pipeline = streaming(Profile::coarse(), &controller, &mut device);

        device
            .sink
            .as_ref()
            .unwrap()
            .report(DiscoLightsError::Audio("device unplugged".into()));

        let (_tx, rx) = crossbeam_channel::unbounded::<()>();
        let err = pipeline.run(&rx).unwrap_err();

        assert!(matches!(err, DiscoLightsError::Audio(_)));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(device.counters.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(controller.count(|call| matches!(call, Call::Off(_))), 1);
    }

    #[test]
    fn light_failure_stops_the_loop() {
        let mut controller = FakeController::new(vec!["1", "2"]);
        controller.fail_updates = true;
        let mut device = FakeDevice::default();
        let mut pipeline = streaming(Profile::coarse(), &controller, &mut device);

        let (_tx, rx) = crossbeam_channel::unbounded::<()>();
        let err = pipeline.run(&rx).unwrap_err();

        assert!(matches!(err, DiscoLightsError::Bridge { .. }));
        assert_eq!(controller.count(|call| matches!(call, Call::Off(_))), 2);
    }

    #[test]
    fn operations_out_of_order_are_rejected() {
        let mut pipeline = CaptureLoop::<FakeLight>::new(Profile::coarse()).unwrap();
        assert!(matches!(
            pipeline.tick(),
            Err(DiscoLightsError::InvalidState {
                expected: PipelineState::Streaming,
                actual: PipelineState::Idle
            })
        ));

        let mut device = FakeDevice::default();
        assert!(pipeline.start(&mut device).is_err());
        assert!(device.sink.is_none());
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut profile = Profile::fine();
        profile.tick_interval_ms = 0;
        assert!(CaptureLoop::<FakeLight>::new(profile).is_err());
    }
}
