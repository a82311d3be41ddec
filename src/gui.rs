//! Preview windows.
//!
//! [`run`] takes over the main thread to run the window event loop and executes the application
//! on a second thread. The application sends frames with [`show_image`] and receives keyboard and
//! window events with [`poll_event`].

mod renderer;

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex,
    },
};

use once_cell::sync::OnceCell;
use winit::{
    event::{self, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget},
    window::WindowId,
};

use crate::{
    image::{Image, Resolution},
    termination::{self, Termination},
};

use self::renderer::{Gpu, Renderer, Window};

/// An input event delivered by [`poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A character was typed while one of the windows had focus.
    KeyPressed(char),
    /// The user closed the window that was showing images under this key.
    WindowClosed(String),
}

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
    events: Sender<Event>,
}

impl Gui {
    fn handle_image(
        &mut self,
        target: &EventLoopWindowTarget<Msg>,
        key: String,
        res: Resolution,
        data: Vec<u8>,
    ) -> anyhow::Result<()> {
        if !self.windows.contains_key(&key) {
            log::debug!("creating window '{}' at {}", key, res);
            let win = Window::open(target, &key, res)?;
            self.win_id_to_key.insert(win.win.id(), key.clone());
            let renderer = Renderer::new(win, self.gpu.clone())?;
            self.windows.insert(key.clone(), renderer);
        }

        if let Some(renderer) = self.windows.get_mut(&key) {
            renderer.update_texture(res, &data);
            renderer.window().request_redraw();
        }
        Ok(())
    }

    fn handle_window_event(&mut self, id: WindowId, event: WindowEvent<'_>) {
        let Some(key) = self.win_id_to_key.get(&id) else {
            return;
        };
        let event = match event {
            WindowEvent::ReceivedCharacter(c) => Event::KeyPressed(c),
            WindowEvent::CloseRequested => {
                log::debug!("window '{}' closed", key);
                let key = key.clone();
                self.windows.remove(&key);
                self.win_id_to_key.remove(&id);
                Event::WindowClosed(key)
            }
            _ => return,
        };
        // The application may already be gone, in which case nobody cares about this event.
        self.events.send(event).ok();
    }

    fn redraw(&mut self, id: WindowId) -> anyhow::Result<()> {
        let Some(renderer) = self
            .win_id_to_key
            .get(&id)
            .and_then(|key| self.windows.get_mut(key))
        else {
            return Ok(());
        };
        renderer.redraw()
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            let res = match event {
                event::Event::UserEvent(Msg::Image { key, res, data }) => {
                    self.handle_image(target, key, res, data)
                }
                event::Event::WindowEvent { window_id, event } => {
                    self.handle_window_event(window_id, event);
                    Ok(())
                }
                event::Event::RedrawRequested(window_id) => self.redraw(window_id),
                _ => Ok(()),
            };
            if let Err(e) = res {
                log::error!("GUI error: {:#}", e);
                process::exit(1);
            }
        })
    }
}

#[derive(Debug)]
enum Msg {
    Image {
        key: String,
        res: Resolution,
        data: Vec<u8>,
    },
}

struct Display {
    proxy: Mutex<EventLoopProxy<Msg>>,
    events: Mutex<Receiver<Event>>,
}

static DISPLAY: OnceCell<Display> = OnceCell::new();

fn send(msg: Msg) {
    let Some(display) = DISPLAY.get() else {
        log::warn!("GUI is not running, dropping {:?}", msg);
        return;
    };
    let proxy = display.proxy.lock().unwrap_or_else(|e| e.into_inner());
    if proxy.send_event(msg).is_err() {
        log::debug!("event loop closed, dropping message");
    }
}

/// Runs the GUI event loop on the calling thread and `cb` on a new thread.
///
/// Must be called from the main thread. The process exits when `cb` returns, with an exit code
/// derived from its [`Termination`] value (or 101 if it panics).
pub fn run<F, R>(cb: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: Termination,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    let (events, receiver) = mpsc::channel();
    let display = Display {
        proxy: Mutex::new(event_loop.create_proxy()),
        events: Mutex::new(receiver),
    };
    if DISPLAY.set(display).is_err() {
        panic!("`gui::run` must only be called once");
    }

    std::thread::spawn(move || match catch_unwind(AssertUnwindSafe(cb)) {
        Ok(outcome) => process::exit(termination::exit_code(&outcome)),
        // The panic hook has already printed the message.
        Err(_payload) => process::exit(101),
    });

    let gpu = match pollster::block_on(Gpu::open()) {
        Ok(gpu) => gpu,
        Err(e) => {
            log::error!("failed to open graphics device: {:#}", e);
            process::exit(1);
        }
    };
    let gui = Gui {
        gpu: Rc::new(gpu),
        windows: HashMap::new(),
        win_id_to_key: HashMap::new(),
        events,
    };
    gui.run(event_loop)
}

/// Displays an image in the window identified by `key`, creating it if necessary.
///
/// `key` is also used as the window title.
pub fn show_image(key: impl Into<String>, image: &Image) {
    send(Msg::Image {
        key: key.into(),
        res: image.resolution(),
        data: image.data().to_vec(),
    });
}

/// Returns the next pending input event, without blocking.
///
/// Returns [`None`] if there is no event, or if the GUI is not running.
pub fn poll_event() -> Option<Event> {
    let display = DISPLAY.get()?;
    let events = display.events.lock().unwrap_or_else(|e| e.into_inner());
    events.try_recv().ok()
}
