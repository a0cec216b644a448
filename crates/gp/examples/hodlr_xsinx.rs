use hodlr_gp::{GaussianProcess, SquaredExponentialKernel};
use ndarray::{concatenate, Array, Array1, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn xsinx(x: &Array2<f64>) -> Array1<f64> {
    ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
}

fn main() {
    env_logger::init();

    let nt = 2000;
    let mut rng = Xoshiro256Plus::seed_from_u64(0);
    let xt = Array::linspace(0., 25., nt).insert_axis(Axis(1));
    let yerr = Array::from_elem(nt, 0.5);
    let yt = xsinx(&xt) + Array::random_using(nt, Normal::new(0., 0.5).unwrap(), &mut rng);

    println!("Build HODLR factorization of 'xsinx' covariance with {nt} noisy points");
    let gp = GaussianProcess::params(SquaredExponentialKernel::new(50., 3.))
        .nleaf(50)
        .tol(1e-10)
        .build(&xt, &yerr)
        .expect("HODLR build");
    println!("{gp}");
    println!(
        "log likelihood = {}",
        gp.log_likelihood(&yt).expect("log likelihood")
    );

    let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
    let ytest = xsinx(&xtest);
    // predict values and standard deviation
    let (ypred, yvar) = gp.predict_var(&yt, &xtest).expect("HODLR prediction");
    let ysigma = yvar.mapv(|v| v.sqrt());

    println!("Compute prediction errors (x, err(x), sigma(x))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            (ypred - ytest).insert_axis(Axis(1)),
            ysigma.insert_axis(Axis(1))
        ]
    );

    let trajs = gp
        .sample_conditional_with_rng(&yt, &xtest, 3, &mut rng)
        .expect("HODLR sampling");
    println!("Posterior trajectories\n{trajs}");
}
