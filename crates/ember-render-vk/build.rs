fn main() {
  println!("cargo:rerun-if-changed=build.rs");
  #[cfg(feature = "builtin-shaders")]
  compile::run();
}

#[cfg(feature = "builtin-shaders")]
mod compile {
  use std::{env, fs, path::PathBuf};

  const SHADERS: &[(&str, shaderc::ShaderKind)] = &[
    ("mesh.vert", shaderc::ShaderKind::Vertex),
    ("mesh.frag", shaderc::ShaderKind::Fragment),
  ];

  pub fn run() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("manifest dir"))
      .join("shaders");

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
      shaderc::TargetEnv::Vulkan,
      shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in SHADERS {
      let path = src_dir.join(name);
      println!("cargo:rerun-if-changed={}", path.display());
      let src = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
      let spv = comp
        .compile_into_spirv(&src, *kind, name, "main", Some(&opts))
        .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
      fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
        .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }
  }
}
