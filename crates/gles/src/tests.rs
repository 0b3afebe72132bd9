use std::sync::{Arc, Mutex};

use spyglass_core::{ConnectionHeader, CoreSpy, Flags};
use spyglass_encoder::{InitialState, MemoryEncoder, Message, Value};
use spyglass_memory::{Address, Slice};
use spyglass_observer::{ApiIndex, CallObserver};

use crate::fake::{FakeGl, DECODED_TEXEL, ENCODED_DEPTH, SURFACE_PIXEL};
use crate::gl::*;
use crate::{GlDriver, GlesSpy};

const ATTRIBUTES: [EGLint; 3] = [EGL_CONTEXT_CLIENT_VERSION, 3, EGL_NONE];

struct Harness {
    core: CoreSpy,
    encoder: Arc<MemoryEncoder>,
    gl: FakeGl,
    spy: GlesSpy,
}

impl Harness {
    fn new(header: ConnectionHeader) -> Self {
        let encoder = Arc::new(MemoryEncoder::new());
        let core = CoreSpy::builder().header(header).encoder(encoder.clone()).build();
        Self { core, encoder, gl: FakeGl::new(), spy: GlesSpy::new() }
    }

    fn call<R>(&mut self, name: &'static str, f: impl FnOnce(&mut GlesSpy, &mut CallObserver, &dyn GlDriver) -> R) -> R {
        let mut observer = CallObserver::new(&self.core, ApiIndex::GLES, name);
        f(&mut self.spy, &mut observer, &self.gl)
    }

    fn context(&mut self, share: EglContext) -> EglContext {
        let attributes = unsafe { Slice::from_app_ptr(ATTRIBUTES.as_ptr(), ATTRIBUTES.len() as u64) };
        self.call("eglCreateContext", |spy, o, gl| spy.create_context(o, gl, 1, 7, share, attributes))
    }

    fn make_current(&mut self, context: EglContext, surface: EglSurface) {
        let made = self.call("eglMakeCurrent", |spy, o, gl| spy.make_current(o, gl, 1, surface, surface, context));
        assert!(made);
    }

    fn texture(&mut self) -> GLuint {
        self.texture_on(GL_TEXTURE_2D)
    }

    fn texture_on(&mut self, target: GLenum) -> GLuint {
        let mut names = [0u32];
        let slice = unsafe { Slice::from_app_ptr(names.as_mut_ptr() as *const GLuint, 1) };
        self.call("glGenTextures", |spy, o, gl| spy.gen_textures(o, gl, slice));
        let name = unsafe { slice.as_slice() }[0];
        self.call("glBindTexture", |spy, o, gl| spy.bind_texture(o, gl, target, name));
        name
    }

    fn buffer(&mut self, data: &[u8]) -> GLuint {
        let mut names = [0u32];
        let slice = unsafe { Slice::from_app_ptr(names.as_mut_ptr() as *const GLuint, 1) };
        self.call("glGenBuffers", |spy, o, gl| spy.gen_buffers(o, gl, slice));
        let name = unsafe { slice.as_slice() }[0];
        self.call("glBindBuffer", |spy, o, gl| spy.bind_buffer(o, gl, GL_ARRAY_BUFFER, name));

        let contents = unsafe { Slice::from_app_ptr(data.as_ptr(), data.len() as u64) };
        self.call("glBufferData", |spy, o, gl| spy.buffer_data(o, gl, GL_ARRAY_BUFFER, data.len() as isize, contents, 0x88E4));
        name
    }

    fn upload_rgba(&mut self, width: i32, height: i32, pixels: &[u8]) {
        let address = Address::from_ptr(pixels.as_ptr());
        self.call("glTexImage2D", |spy, o, gl| unsafe {
            spy.tex_image_2d(o, gl, GL_TEXTURE_2D, 0, GL_RGBA as GLint, width, height, 0, GL_RGBA, GL_UNSIGNED_BYTE, address)
        });
    }

    fn swap(&mut self, surface: EglSurface) {
        self.call("eglSwapBuffers", |spy, o, gl| spy.swap_buffers(o, gl, 1, surface));
    }

    fn messages(&self) -> Vec<Message> {
        self.encoder.messages()
    }

    fn observed_sizes(&self) -> Vec<u64> {
        self.messages().into_iter()
            .filter_map(|m| match m {
                Message::Observation(o) => Some(o.size),
                _ => None,
            })
            .collect()
    }

    fn initial_states(&self, kind: &str) -> Vec<InitialState> {
        self.messages().into_iter()
            .filter_map(|m| match m {
                Message::InitialState(s) if s.kind == kind => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Bytes injected for the pool named by an initial-state record.
    fn pool_contents(&self, state: &InitialState) -> Option<Vec<u8>> {
        let pool = match field(state, "pool")? {
            Value::U32(pool) => pool,
            _ => return None,
        };

        let messages = self.messages();
        let observation = messages.iter().find_map(|m| match m {
            Message::Observation(o) if o.pool == pool => Some(o.resource),
            _ => None,
        })?;

        messages.iter().find_map(|m| match m {
            Message::Resource(r) if r.id == observation.index() => Some(r.data.clone()),
            _ => None,
        })
    }
}

fn field(state: &InitialState, name: &str) -> Option<Value> {
    state.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
}

#[test]
fn share_groups_see_each_others_textures() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let first = h.context(0);
    let second = h.context(first);
    let lonely = h.context(0);

    h.make_current(first, surface);
    let texture = h.texture();

    let first_group = h.spy.context(first).unwrap().share_group;
    let second_group = h.spy.context(second).unwrap().share_group;
    let lonely_group = h.spy.context(lonely).unwrap().share_group;

    assert_eq!(first_group, second_group);
    assert_ne!(first_group, lonely_group);
    assert!(h.spy.share_group(second_group).unwrap().textures.contains_key(&texture));
    assert!(h.spy.share_group(lonely_group).unwrap().textures.is_empty());
}

#[test]
fn destroying_a_current_context_waits_until_it_is_released() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);

    h.call("eglDestroyContext", |spy, o, gl| spy.destroy_context(o, gl, 1, context));
    assert!(h.spy.context(context).unwrap().destroyed);

    h.make_current(EGL_NO_CONTEXT, EGL_NO_SURFACE);
    assert!(h.spy.context(context).is_none());
    assert_eq!(h.spy.context_count(), 0);
}

#[test]
fn texture_uploads_are_observed() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);
    let texture = h.texture();

    let pixels: Vec<u8> = (0..16).collect();
    h.upload_rgba(2, 2, &pixels);

    assert!(h.observed_sizes().contains(&16));
    assert!(h.messages().iter().any(|m| matches!(m, Message::Resource(r) if r.data == pixels)));

    let group = h.spy.current_group(h.core_thread()).unwrap();
    let level = group.textures[&texture].level(GL_TEXTURE_2D, 0).unwrap();
    assert_eq!((level.width, level.height, level.format), (2, 2, GL_RGBA));
}

#[test]
fn uploads_follow_the_unpack_alignment() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);
    h.texture();

    h.call("glPixelStorei", |spy, o, gl| spy.pixel_store(o, gl, GL_UNPACK_ALIGNMENT, 1));
    let pixels = [7u8; 9];
    let address = Address::from_ptr(pixels.as_ptr());
    h.call("glTexImage2D", |spy, o, gl| unsafe {
        spy.tex_image_2d(o, gl, GL_TEXTURE_2D, 0, GL_RGB as GLint, 3, 1, 0, GL_RGB, GL_UNSIGNED_BYTE, address)
    });

    assert_eq!(h.observed_sizes().last(), Some(&9));
}

#[test]
fn deleted_textures_are_forgotten_and_unbound() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);
    let texture = h.texture();

    let names = [texture];
    let slice = unsafe { Slice::from_app_ptr(names.as_ptr(), 1) };
    h.call("glDeleteTextures", |spy, o, gl| spy.delete_textures(o, gl, slice));

    let thread = h.core_thread();
    assert!(h.spy.current_group(thread).unwrap().textures.is_empty());
    assert_eq!(h.spy.current_context(thread).unwrap().bindings.texture(GL_TEXTURE_2D), 0);
}

#[test]
fn writes_through_a_mapping_are_observed_at_unmap() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);
    h.buffer(&[0u8; 8]);

    let pointer = h.call("glMapBufferRange", |spy, o, gl| {
        spy.map_buffer_range(o, gl, GL_ARRAY_BUFFER, 0, 8, GL_MAP_WRITE_BIT)
    });
    assert!(!pointer.is_null());
    unsafe { std::ptr::write_bytes(pointer as *mut u8, 0xAB, 8) };

    h.call("glUnmapBuffer", |spy, o, gl| spy.unmap_buffer(o, gl, GL_ARRAY_BUFFER));

    assert!(h.messages().iter().any(|m| matches!(m, Message::Resource(r) if r.data == vec![0xAB; 8])));
}

#[test]
fn client_side_indices_are_observed() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(4, 4);
    let context = h.context(0);
    h.make_current(context, surface);

    let indices: [u16; 3] = [0, 1, 2];
    let address = indices.as_ptr() as usize;
    h.call("glDrawElements", |spy, o, gl| unsafe {
        spy.draw_elements(o, gl, GL_TRIANGLES, 3, GL_UNSIGNED_SHORT, address)
    });

    assert_eq!(h.observed_sizes().last(), Some(&6));
}

#[test]
fn frames_are_observed_at_the_requested_frequency() {
    let mut h = Harness::new(ConnectionHeader { observe_frame_frequency: 1, ..Default::default() });
    let surface = h.gl.add_surface(4, 2);
    let context = h.context(0);
    h.make_current(context, surface);

    h.swap(surface);

    let observation = h.messages().into_iter()
        .find_map(|m| match m {
            Message::FramebufferObservation(f) => Some(f),
            _ => None,
        })
        .unwrap();
    assert_eq!((observation.original_width, observation.original_height), (4, 2));
    assert_eq!(&observation.data[..4], &SURFACE_PIXEL);
}

#[test]
fn draws_are_observed_at_the_requested_frequency() {
    let mut h = Harness::new(ConnectionHeader { observe_draw_frequency: 2, ..Default::default() });
    let surface = h.gl.add_surface(2, 2);
    let context = h.context(0);
    h.make_current(context, surface);

    let count = |h: &Harness| h.messages().iter().filter(|m| matches!(m, Message::FramebufferObservation(_))).count();

    h.call("glDrawArrays", |spy, o, gl| spy.draw_arrays(o, gl, GL_TRIANGLES, 0, 3));
    assert_eq!(count(&h), 0);
    h.call("glDrawArrays", |spy, o, gl| spy.draw_arrays(o, gl, GL_TRIANGLES, 0, 3));
    assert_eq!(count(&h), 1);
}

#[test]
fn a_frame_budget_of_one_stops_tracing_after_the_swap() {
    let mut h = Harness::new(ConnectionHeader { num_frames: 1, ..Default::default() });
    let surface = h.gl.add_surface(2, 2);
    let context = h.context(0);
    h.make_current(context, surface);

    h.swap(surface);
    let before = h.messages().len();

    h.texture();
    assert_eq!(h.messages().len(), before);
    assert!(h.core.is_suspended());
}

fn call_with<R>(
    core: &CoreSpy,
    spy: &Mutex<GlesSpy>,
    gl: &FakeGl,
    name: &'static str,
    f: impl FnOnce(&mut GlesSpy, &mut CallObserver, &dyn GlDriver) -> R,
) -> R {
    let mut observer = CallObserver::new(core, ApiIndex::GLES, name);
    f(&mut spy.lock().unwrap(), &mut observer, gl)
}

#[test]
fn recorded_errors_are_returned_once_per_context() {
    let h = Harness::new(ConnectionHeader { flags: Flags::RECORD_ERROR_STATE, ..Default::default() });
    let surface = h.gl.add_surface(2, 2);
    let Harness { core, encoder, gl, spy } = h;
    let spy = Mutex::new(spy);
    let (core, gl, spy) = (&core, &gl, &spy);

    let attributes = unsafe { Slice::from_app_ptr(ATTRIBUTES.as_ptr(), ATTRIBUTES.len() as u64) };
    let first = call_with(core, spy, gl, "eglCreateContext", |s, o, gl| s.create_context(o, gl, 1, 7, 0, attributes));
    let second = call_with(core, spy, gl, "eglCreateContext", |s, o, gl| s.create_context(o, gl, 1, 7, 0, attributes));

    std::thread::scope(|scope| {
        scope.spawn(move || {
            call_with(core, spy, gl, "eglMakeCurrent", |s, o, gl| s.make_current(o, gl, 1, surface, surface, first));
            call_with(core, spy, gl, "glBindTexture", |s, o, gl| s.bind_texture(o, gl, 0x1234, 1));

            // The spy consumed the driver's error; the application still sees it.
            assert_eq!(gl.get_error(), GL_NO_ERROR);
            assert_eq!(call_with(core, spy, gl, "glGetError", |s, o, gl| s.get_error(o, gl)), GL_INVALID_ENUM);
            assert_eq!(call_with(core, spy, gl, "glGetError", |s, o, gl| s.get_error(o, gl)), GL_NO_ERROR);
        }).join().unwrap();

        scope.spawn(move || {
            call_with(core, spy, gl, "eglMakeCurrent", |s, o, gl| s.make_current(o, gl, 1, surface, surface, second));
            assert_eq!(call_with(core, spy, gl, "glGetError", |s, o, gl| s.get_error(o, gl)), GL_NO_ERROR);
        }).join().unwrap();
    });

    let recorded = encoder.messages().into_iter()
        .filter(|m| matches!(m, Message::Extra { name, value: Value::U32(GL_INVALID_ENUM) } if name == "gl_error"))
        .count();
    assert_eq!(recorded, 1);
}

#[test]
fn errors_are_left_to_the_driver_when_not_recorded() {
    let mut h = Harness::new(ConnectionHeader::default());
    let surface = h.gl.add_surface(2, 2);
    let context = h.context(0);
    h.make_current(context, surface);

    h.call("glBindTexture", |spy, o, gl| spy.bind_texture(o, gl, 0x1234, 1));
    assert_eq!(h.call("glGetError", |spy, o, gl| spy.get_error(o, gl)), GL_INVALID_ENUM);
}

#[test]
fn late_captures_read_back_live_objects() {
    let mut h = Harness::new(ConnectionHeader { start_frame: 1, ..Default::default() });
    let surface = h.gl.add_surface(2, 2);
    let context = h.context(0);
    h.make_current(context, surface);

    let color = h.texture();
    let pixels: Vec<u8> = (100..116).collect();
    h.upload_rgba(2, 2, &pixels);

    let compressed = h.texture();
    let blocks = [0x55u8; 8];
    let data = unsafe { Slice::from_app_ptr(blocks.as_ptr(), 8) };
    h.call("glCompressedTexImage2D", |spy, o, gl| {
        spy.compressed_tex_image_2d(o, gl, GL_TEXTURE_2D, 0, GL_ETC1_RGB8_OES, 4, 4, 0, data)
    });

    let depth = h.texture();
    h.call("glTexStorage2D", |spy, o, gl| spy.tex_storage_2d(o, gl, GL_TEXTURE_2D, 1, GL_DEPTH_COMPONENT24, 2, 2));

    let multisampled = h.texture_on(GL_TEXTURE_2D_MULTISAMPLE);
    h.call("glTexStorage2DMultisample", |spy, o, gl| {
        spy.tex_storage_2d_multisample(o, gl, GL_TEXTURE_2D_MULTISAMPLE, 4, GL_RGBA8, 2, 2, true)
    });

    let whole = h.buffer(&[9u8; 8]);
    let partial = h.buffer(&[3u8; 8]);
    h.call("glMapBufferRange", |spy, o, gl| spy.map_buffer_range(o, gl, GL_ARRAY_BUFFER, 0, 4, GL_MAP_WRITE_BIT));

    assert!(h.messages().is_empty());
    h.swap(surface);
    assert!(h.core.take_mec_request());

    h.call("mec", |spy, o, gl| spy.capture_state(o, gl));

    let levels = h.initial_states("TextureLevel");
    let level = |name: GLuint| levels.iter().find(|s| s.handle == name as u64);

    assert_eq!(h.pool_contents(level(color).unwrap()), Some(pixels));
    assert_eq!(field(level(color).unwrap(), "resampled"), Some(Value::Bool(false)));

    assert_eq!(h.pool_contents(level(compressed).unwrap()), Some(DECODED_TEXEL.repeat(16)));
    assert_eq!(field(level(compressed).unwrap(), "resampled"), Some(Value::Bool(true)));

    let depth_texel = [ENCODED_DEPTH[2], ENCODED_DEPTH[1], ENCODED_DEPTH[0]];
    assert_eq!(h.pool_contents(level(depth).unwrap()), Some(depth_texel.repeat(4)));

    assert!(level(multisampled).is_none());
    assert!(h.initial_states("Texture").iter().any(|s| s.handle == multisampled as u64));

    let buffers = h.initial_states("Buffer");
    let buffer = |name: GLuint| buffers.iter().find(|s| s.handle == name as u64).unwrap();
    assert_eq!(h.pool_contents(buffer(whole)), Some(vec![9u8; 8]));
    assert_eq!(h.pool_contents(buffer(partial)), None);

    // The application's context is current again and the private one is gone.
    assert_eq!(h.gl.egl_get_current_context(), context);
    assert_eq!(h.gl.count("eglDestroyContext"), 1);
}

impl Harness {
    fn core_thread(&self) -> u64 {
        spyglass_observer::current_thread_id()
    }
}
