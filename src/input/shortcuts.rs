use anyhow::{anyhow, Context, Result};
use evdev::{Device, InputEventKind, Key};
use std::collections::HashSet;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc, Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use udev::{EventType, MonitorBuilder};

use crate::config::Binding;

const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub triggered_at: Instant,
    pub binding: Binding,
}

/// Parses `ctrl+alt+v` style shortcuts into evdev keys.
pub fn parse_shortcut(shortcut: &str) -> Result<HashSet<Key>> {
    let mut keys = HashSet::new();
    for part in shortcut.split('+') {
        let name = part.trim().to_uppercase();
        if name.is_empty() {
            continue;
        }
        let key =
            parse_key(&name).with_context(|| format!("Unknown key '{name}' in '{shortcut}'"))?;
        keys.insert(key);
    }

    if keys.is_empty() {
        return Err(anyhow!("Empty shortcut"));
    }
    Ok(keys)
}

fn parse_key(name: &str) -> Option<Key> {
    const LETTERS: [Key; 26] = [
        Key::KEY_A, Key::KEY_B, Key::KEY_C, Key::KEY_D, Key::KEY_E, Key::KEY_F, Key::KEY_G,
        Key::KEY_H, Key::KEY_I, Key::KEY_J, Key::KEY_K, Key::KEY_L, Key::KEY_M, Key::KEY_N,
        Key::KEY_O, Key::KEY_P, Key::KEY_Q, Key::KEY_R, Key::KEY_S, Key::KEY_T, Key::KEY_U,
        Key::KEY_V, Key::KEY_W, Key::KEY_X, Key::KEY_Y, Key::KEY_Z,
    ];
    const DIGITS: [Key; 10] = [
        Key::KEY_0, Key::KEY_1, Key::KEY_2, Key::KEY_3, Key::KEY_4,
        Key::KEY_5, Key::KEY_6, Key::KEY_7, Key::KEY_8, Key::KEY_9,
    ];
    const FUNCTION: [Key; 12] = [
        Key::KEY_F1, Key::KEY_F2, Key::KEY_F3, Key::KEY_F4, Key::KEY_F5, Key::KEY_F6,
        Key::KEY_F7, Key::KEY_F8, Key::KEY_F9, Key::KEY_F10, Key::KEY_F11, Key::KEY_F12,
    ];

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.clone().next()) {
        if c.is_ascii_uppercase() {
            return Some(LETTERS[(c as u8 - b'A') as usize]);
        }
        if c.is_ascii_digit() {
            return Some(DIGITS[(c as u8 - b'0') as usize]);
        }
    }
    if let Some(number) = name.strip_prefix('F').and_then(|n| n.parse::<usize>().ok()) {
        return (1..=12).contains(&number).then(|| FUNCTION[number - 1]);
    }

    let key = match name {
        "SUPER" | "META" | "WIN" | "WINDOWS" => Key::KEY_LEFTMETA,
        "ALT" => Key::KEY_LEFTALT,
        "CTRL" | "CONTROL" => Key::KEY_LEFTCTRL,
        "SHIFT" => Key::KEY_LEFTSHIFT,
        "SPACE" => Key::KEY_SPACE,
        "ENTER" | "RETURN" => Key::KEY_ENTER,
        "ESC" | "ESCAPE" => Key::KEY_ESC,
        "TAB" => Key::KEY_TAB,
        "BACKSPACE" => Key::KEY_BACKSPACE,
        "DELETE" | "DEL" => Key::KEY_DELETE,
        "INSERT" | "INS" => Key::KEY_INSERT,
        "HOME" => Key::KEY_HOME,
        "END" => Key::KEY_END,
        "PAGEUP" | "PGUP" => Key::KEY_PAGEUP,
        "PAGEDOWN" | "PGDOWN" => Key::KEY_PAGEDOWN,
        "UP" => Key::KEY_UP,
        "DOWN" => Key::KEY_DOWN,
        "LEFT" => Key::KEY_LEFT,
        "RIGHT" => Key::KEY_RIGHT,
        _ => return None,
    };
    Some(key)
}

/// Right-hand modifiers count as their left-hand twins.
fn normalize_key(key: Key) -> Key {
    match key {
        Key::KEY_RIGHTCTRL => Key::KEY_LEFTCTRL,
        Key::KEY_RIGHTALT => Key::KEY_LEFTALT,
        Key::KEY_RIGHTSHIFT => Key::KEY_LEFTSHIFT,
        Key::KEY_RIGHTMETA => Key::KEY_LEFTMETA,
        other => other,
    }
}

struct ChordState {
    binding: Binding,
    keys: HashSet<Key>,
    active: bool,
    last_trigger: Option<Instant>,
}

/// Tracks pressed keys against every configured chord.
///
/// When several chords complete on the same key press (`ctrl+alt+n` and
/// `ctrl+alt+shift+n`), only the one with the most keys fires.
struct ChordMatcher {
    chords: Vec<ChordState>,
    pressed: HashSet<Key>,
}

impl ChordMatcher {
    fn new(bindings: Vec<Binding>) -> Result<Self> {
        let chords = bindings
            .into_iter()
            .map(|binding| {
                let keys = parse_shortcut(&binding.shortcut)?;
                Ok(ChordState {
                    binding,
                    keys,
                    active: false,
                    last_trigger: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chords,
            pressed: HashSet::new(),
        })
    }

    fn press(&mut self, key: Key, now: Instant) -> Option<Binding> {
        self.pressed.insert(normalize_key(key));

        let pressed = &self.pressed;
        let best = self
            .chords
            .iter()
            .enumerate()
            .filter(|(_, chord)| !chord.active && chord.keys.is_subset(pressed))
            .max_by_key(|(_, chord)| chord.keys.len())
            .map(|(index, _)| index)?;

        // Every satisfied chord becomes active so a subset chord cannot fire
        // later while the larger one is still held.
        for chord in &mut self.chords {
            if chord.keys.is_subset(pressed) {
                chord.active = true;
            }
        }

        let chord = &mut self.chords[best];
        if chord
            .last_trigger
            .is_some_and(|last| now.duration_since(last) < DEBOUNCE)
        {
            debug!(shortcut = chord.binding.shortcut.as_str(), "Shortcut debounced");
            return None;
        }
        chord.last_trigger = Some(now);
        Some(chord.binding.clone())
    }

    fn release(&mut self, key: Key) {
        self.pressed.remove(&normalize_key(key));
        let pressed = &self.pressed;
        for chord in &mut self.chords {
            if chord.active && !chord.keys.is_subset(pressed) {
                chord.active = false;
            }
        }
    }

    fn reset(&mut self) {
        self.pressed.clear();
        for chord in &mut self.chords {
            chord.active = false;
        }
    }
}

/// evdev listener for every configured binding; runs on its own thread.
pub struct GlobalShortcuts {
    devices: Vec<KeyboardDevice>,
    matcher: ChordMatcher,
}

struct KeyboardDevice {
    path: PathBuf,
    device: Device,
}

#[derive(Debug, Clone)]
enum InputDeviceEvent {
    Added(PathBuf),
    Removed(PathBuf),
    Changed(PathBuf),
    MonitorUnavailable(String),
}

impl GlobalShortcuts {
    pub fn new(bindings: Vec<Binding>) -> Result<Self> {
        let matcher = ChordMatcher::new(bindings)?;
        let devices = find_keyboard_devices(true);

        if devices.is_empty() {
            return Err(anyhow!("No keyboard devices found"));
        }

        info!(
            "Global shortcuts initialized - monitoring {} device(s) for {} binding(s)",
            devices.len(),
            matcher.chords.len()
        );

        Ok(Self { devices, matcher })
    }

    pub fn run(mut self, tx: mpsc::Sender<TriggerEvent>, stop: Arc<AtomicBool>) -> Result<()> {
        let fallback_rescan_interval = Duration::from_secs(1);
        let mut fallback_rescan_enabled = false;
        let mut last_fallback_rescan = Instant::now();
        let (rescan_tx, rescan_rx) = std_mpsc::channel();
        let monitor_stop = stop.clone();
        std::thread::spawn(move || {
            let monitor_tx = rescan_tx.clone();
            if let Err(err) = watch_input_devices(monitor_tx, monitor_stop) {
                let _ = rescan_tx.send(InputDeviceEvent::MonitorUnavailable(err.to_string()));
            }
        });

        for chord in &self.matcher.chords {
            info!(
                "🎯 Listening for {}: {:?}",
                chord.binding.shortcut, chord.binding.action
            );
        }

        'outer: loop {
            if stop.load(Ordering::Relaxed) {
                info!("Stopping shortcut listener");
                break 'outer;
            }

            while let Ok(event) = rescan_rx.try_recv() {
                match event {
                    InputDeviceEvent::MonitorUnavailable(reason) => {
                        if !fallback_rescan_enabled {
                            warn!(
                                "Input device monitor unavailable ({}); falling back to periodic rescan",
                                reason
                            );
                        }
                        fallback_rescan_enabled = true;
                        last_fallback_rescan = Instant::now() - fallback_rescan_interval;
                    }
                    _ => {
                        self.handle_input_device_event(event);
                        self.matcher.reset();
                    }
                }
            }

            let mut removed_devices = HashSet::new();

            for entry in &mut self.devices {
                match entry.device.fetch_events() {
                    Ok(events) => {
                        for event in events {
                            let InputEventKind::Key(key) = event.kind() else {
                                continue;
                            };
                            match event.value() {
                                1 => {
                                    let now = Instant::now();
                                    if let Some(binding) = self.matcher.press(key, now) {
                                        info!("✨ Shortcut triggered: {}", binding.shortcut);
                                        if let Err(e) = tx.try_send(TriggerEvent {
                                            triggered_at: now,
                                            binding,
                                        }) {
                                            warn!("Failed to send shortcut event: {}", e);
                                        }
                                    }
                                }
                                0 => self.matcher.release(key),
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        if e.kind() != io::ErrorKind::WouldBlock {
                            error!("Error fetching events: {}", e);
                            if is_device_disconnect_error(&e) {
                                warn!("Input device went away; removing device");
                                removed_devices.insert(entry.path.clone());
                            }
                        }
                    }
                }
                if stop.load(Ordering::Relaxed) {
                    break 'outer;
                }
            }

            if !removed_devices.is_empty() {
                self.devices
                    .retain(|device| !removed_devices.contains(&device.path));
                info!("Monitoring {} keyboard device(s)", self.devices.len());
                self.matcher.reset();
            }

            if fallback_rescan_enabled
                && last_fallback_rescan.elapsed() >= fallback_rescan_interval
            {
                last_fallback_rescan = Instant::now();
                self.matcher.reset();
                self.devices = find_keyboard_devices(false);
                debug!("Keyboard devices rescanned - {} device(s)", self.devices.len());
            }

            std::thread::sleep(Duration::from_millis(10));
        }

        Ok(())
    }

    fn handle_input_device_event(&mut self, event: InputDeviceEvent) {
        match event {
            InputDeviceEvent::Added(path) => self.add_keyboard_device(path),
            InputDeviceEvent::Removed(path) => self.remove_keyboard_device(&path),
            InputDeviceEvent::Changed(path) => {
                self.remove_keyboard_device(&path);
                self.add_keyboard_device(path);
            }
            InputDeviceEvent::MonitorUnavailable(_) => {}
        }
    }

    fn add_keyboard_device(&mut self, path: PathBuf) {
        if self.devices.iter().any(|device| device.path == path) {
            return;
        }
        match open_keyboard_device(&path) {
            Ok(Some(device)) => {
                self.devices.push(device);
                info!("Monitoring {} keyboard device(s)", self.devices.len());
            }
            Ok(None) => debug!("Input device added but not a keyboard: {:?}", path),
            Err(err) => warn!("Failed to open input device {:?}: {}", path, err),
        }
    }

    fn remove_keyboard_device(&mut self, path: &Path) {
        let before = self.devices.len();
        self.devices.retain(|device| device.path != path);
        if self.devices.len() != before {
            info!("Monitoring {} keyboard device(s)", self.devices.len());
        }
        if self.devices.is_empty() {
            warn!("No keyboard devices found!");
        }
    }
}

fn find_keyboard_devices(log_devices: bool) -> Vec<KeyboardDevice> {
    let mut keyboards = Vec::new();

    for (path, device) in evdev::enumerate() {
        if !is_keyboard_device(&device) {
            continue;
        }
        if let Err(err) = set_device_nonblocking(&device) {
            warn!("Failed to set non-blocking mode for {:?}: {}", path, err);
        }
        if log_devices {
            info!(
                "Found keyboard device: {} at {:?}",
                device.name().unwrap_or("Unknown"),
                path
            );
        }
        keyboards.push(KeyboardDevice { path, device });
    }

    if keyboards.is_empty() {
        warn!("No keyboard devices found!");
        warn!("Make sure you have read permissions for /dev/input/event*");
        warn!("You may need to add your user to the 'input' group");
    }

    keyboards
}

fn is_keyboard_device(device: &Device) -> bool {
    device.supported_keys().is_some_and(|keys| {
        keys.contains(Key::KEY_A) && keys.contains(Key::KEY_S) && keys.contains(Key::KEY_D)
    })
}

fn open_keyboard_device(path: &Path) -> Result<Option<KeyboardDevice>> {
    let device = Device::open(path)?;
    if !is_keyboard_device(&device) {
        return Ok(None);
    }
    if let Err(err) = set_device_nonblocking(&device) {
        warn!("Failed to set non-blocking mode for {:?}: {}", path, err);
    }
    info!(
        "Found keyboard device: {} at {:?}",
        device.name().unwrap_or("Unknown"),
        path
    );
    Ok(Some(KeyboardDevice {
        path: path.to_path_buf(),
        device,
    }))
}

fn watch_input_devices(
    tx: std_mpsc::Sender<InputDeviceEvent>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let monitor = MonitorBuilder::new()?.match_subsystem("input")?.listen()?;

    while !stop.load(Ordering::Relaxed) {
        let mut saw_event = false;
        for event in monitor.iter() {
            saw_event = true;
            let Some(path) = event.device().devnode().map(Path::to_path_buf) else {
                continue;
            };
            if !is_input_event_node(&path) {
                continue;
            }
            let device_event = match event.event_type() {
                EventType::Add => InputDeviceEvent::Added(path),
                EventType::Remove => InputDeviceEvent::Removed(path),
                EventType::Change => InputDeviceEvent::Changed(path),
                _ => continue,
            };
            if tx.send(device_event).is_err() {
                return Ok(());
            }
        }
        if !saw_event {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    Ok(())
}

fn is_device_disconnect_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::ENODEV || code == libc::EBADF || code == libc::ENXIO
    )
}

fn set_device_nonblocking(device: &Device) -> Result<()> {
    let fd = device.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(anyhow!(
            "fcntl(F_GETFL) failed: {}",
            io::Error::last_os_error()
        ));
    }
    if (flags & libc::O_NONBLOCK) != 0 {
        return Ok(());
    }

    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(anyhow!(
            "fcntl(F_SETFL) failed: {}",
            io::Error::last_os_error()
        ));
    }
    Ok(())
}

fn is_input_event_node(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|node| node.starts_with("/dev/input/event"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindingAction;
    use crate::transform::Direction;

    fn binding(shortcut: &str, action: BindingAction) -> Binding {
        Binding {
            shortcut: shortcut.to_string(),
            action,
        }
    }

    fn forward(shortcut: &str) -> Binding {
        binding(shortcut, BindingAction::Transform(Direction::Forward))
    }

    #[test]
    fn parses_modifiers_letters_and_function_keys() {
        let keys = parse_shortcut("Ctrl+Alt+V").expect("valid shortcut");
        assert_eq!(
            keys,
            HashSet::from([Key::KEY_LEFTCTRL, Key::KEY_LEFTALT, Key::KEY_V])
        );
        assert!(parse_shortcut("super+f12").expect("valid").contains(&Key::KEY_F12));
        assert!(parse_shortcut("ctrl+5").expect("valid").contains(&Key::KEY_5));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_shortcut("ctrl+banana").is_err());
        assert!(parse_shortcut("f13").is_err());
        assert!(parse_shortcut("").is_err());
    }

    #[test]
    fn fires_once_per_chord_press() {
        let mut matcher = ChordMatcher::new(vec![forward("ctrl+v")]).expect("matcher");
        let start = Instant::now();

        assert!(matcher.press(Key::KEY_LEFTCTRL, start).is_none());
        let fired = matcher.press(Key::KEY_V, start).expect("chord fires");
        assert_eq!(fired.shortcut, "ctrl+v");

        // key repeat while held
        assert!(matcher.press(Key::KEY_V, start + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn right_modifiers_match() {
        let mut matcher = ChordMatcher::new(vec![forward("ctrl+v")]).expect("matcher");
        let now = Instant::now();
        matcher.press(Key::KEY_RIGHTCTRL, now);
        assert!(matcher.press(Key::KEY_V, now).is_some());
    }

    #[test]
    fn most_specific_chord_wins() {
        let mut matcher = ChordMatcher::new(vec![
            forward("ctrl+alt+n"),
            binding("ctrl+alt+shift+n", BindingAction::Transform(Direction::Reverse)),
        ])
        .expect("matcher");
        let now = Instant::now();

        matcher.press(Key::KEY_LEFTCTRL, now);
        matcher.press(Key::KEY_LEFTALT, now);
        matcher.press(Key::KEY_LEFTSHIFT, now);
        let fired = matcher.press(Key::KEY_N, now).expect("chord fires");
        assert_eq!(fired.action, BindingAction::Transform(Direction::Reverse));

        // releasing shift while n is held must not fire the smaller chord
        matcher.release(Key::KEY_LEFTSHIFT);
        assert!(matcher.press(Key::KEY_N, now).is_none());
    }

    #[test]
    fn debounces_rapid_repeats() {
        let mut matcher = ChordMatcher::new(vec![forward("ctrl+v")]).expect("matcher");
        let start = Instant::now();

        matcher.press(Key::KEY_LEFTCTRL, start);
        assert!(matcher.press(Key::KEY_V, start).is_some());
        matcher.release(Key::KEY_V);
        assert!(matcher
            .press(Key::KEY_V, start + Duration::from_millis(50))
            .is_none());
        matcher.release(Key::KEY_V);
        assert!(matcher
            .press(Key::KEY_V, start + Duration::from_millis(400))
            .is_some());
    }

    #[test]
    fn detects_enodev_as_disconnect() {
        let err = io::Error::from_raw_os_error(libc::ENODEV);
        assert!(is_device_disconnect_error(&err));
    }

    #[test]
    fn does_not_treat_would_block_as_disconnect() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(!is_device_disconnect_error(&err));
    }

    #[test]
    fn filters_input_event_nodes() {
        assert!(is_input_event_node(Path::new("/dev/input/event0")));
        assert!(!is_input_event_node(Path::new("/dev/input/mouse0")));
        assert!(!is_input_event_node(Path::new("/tmp/event0")));
    }
}
